use crate::cosmos::LevelConfig;

/// Position-only view of a content block. Numbers and rounds start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BlockSlot {
    Fact { number: usize },
    Quiz { round: usize },
}

impl BlockSlot {
    pub fn is_quiz(&self) -> bool {
        matches!(self, BlockSlot::Quiz { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Block(BlockSlot),
    EndOfLevel,
}

/// Slot at `index` of the level plan.
///
/// The plan is `interval` facts followed by a quiz, repeated for every full
/// round, then whatever facts are left over without a quiz.
pub fn slot_at(level: &LevelConfig, index: usize) -> Option<BlockSlot> {
    if index >= level.block_count() {
        return None;
    }
    let round_len = level.quiz_interval + 1;
    let round = index / round_len;
    let offset = index % round_len;

    if round >= level.rounds() {
        let trailing = index - level.rounds() * round_len;
        return Some(BlockSlot::Fact {
            number: level.rounds() * level.quiz_interval + trailing + 1,
        });
    }

    if offset < level.quiz_interval {
        Some(BlockSlot::Fact {
            number: round * level.quiz_interval + offset + 1,
        })
    } else {
        Some(BlockSlot::Quiz { round: round + 1 })
    }
}

pub fn level_plan(level: &LevelConfig) -> Vec<BlockSlot> {
    (0..level.block_count())
        .filter_map(|index| slot_at(level, index))
        .collect()
}

/// Fact numbers a quiz round asks about.
pub fn round_facts(level: &LevelConfig, round: usize) -> std::ops::RangeInclusive<usize> {
    let first = (round - 1) * level.quiz_interval + 1;
    first..=round * level.quiz_interval
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Sequencer {
    level: LevelConfig,
    cursor: usize,
    facts_shown: usize,
}

impl Sequencer {
    pub fn new(level: LevelConfig) -> Self {
        Self {
            level,
            cursor: 0,
            facts_shown: 0,
        }
    }

    pub fn level(&self) -> &LevelConfig {
        &self.level
    }

    pub fn facts_shown(&self) -> usize {
        self.facts_shown
    }

    pub fn peek(&self) -> Option<BlockSlot> {
        slot_at(&self.level, self.cursor)
    }

    pub fn advance(&mut self) -> Advance {
        match self.peek() {
            Some(slot) => {
                self.cursor += 1;
                if let BlockSlot::Fact { .. } = slot {
                    self.facts_shown += 1;
                }
                Advance::Block(slot)
            }
            None => Advance::EndOfLevel,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.level.block_count()
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.facts_shown = 0;
    }
}
