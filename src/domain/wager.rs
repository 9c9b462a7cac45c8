use rand::Rng;
use serde::{Deserialize, Serialize};

use super::Coins;

/// Faces of the die a wager is settled against.
pub const DIE_FACES: [u8; 6] = [1, 2, 3, 4, 5, 6];

pub fn is_die_face(n: i64) -> bool {
    DIE_FACES.iter().any(|&face| i64::from(face) == n)
}

/// Source of die rolls. Every call must return a member of [`DIE_FACES`].
pub trait DiceRoller: Send + Sync {
    fn roll(&self) -> u8;
}

/// Uniform roll over the six faces.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomDie;

impl DiceRoller for RandomDie {
    fn roll(&self) -> u8 {
        DIE_FACES[rand::thread_rng().gen_range(0..DIE_FACES.len())]
    }
}

/// Always lands on the same face.
#[derive(Debug, Clone, Copy)]
pub struct FixedDie(u8);

impl FixedDie {
    pub fn new(face: u8) -> Self {
        assert!(
            DIE_FACES.contains(&face),
            "Fixed die face must be between 1 and 6"
        );
        Self(face)
    }
}

impl DiceRoller for FixedDie {
    fn roll(&self) -> u8 {
        self.0
    }
}

/// How a settled wager came out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerOutcome {
    /// The face the wager was compared against
    pub chosen: u8,
    /// True when the caller's number was not a die face and a random face was used instead
    pub substituted: bool,
    /// The face the die landed on
    pub outcome: u8,
    pub win: bool,
    pub amount: Coins,
    /// Wallet balance after settlement
    pub wallet: Coins,
}

/// Resolve the face to bet on. A number that is not a die face is replaced
/// by a random face instead of being rejected.
pub fn normalize_choice(chosen: i64, roller: &dyn DiceRoller) -> (u8, bool) {
    if is_die_face(chosen) {
        (chosen as u8, false)
    } else {
        (roller.roll(), true)
    }
}
