pub mod comsigan;
pub mod nara_g2b;
pub mod open_go_kr;

pub use comsigan::{ComsiganItem, ComsiganRecord};
pub use nara_g2b::{NaraG2bItem, NaraG2bRecord};
pub use open_go_kr::{OpenGoKrItem, OpenGoKrRecord};

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Target portals with a worker session implementation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Site {
    NaraG2b,
    Comsigan,
    OpenGoKr,
}

impl Site {
    pub const ALL: [Site; 3] = [Site::NaraG2b, Site::Comsigan, Site::OpenGoKr];

    pub fn key(self) -> &'static str {
        match self {
            Self::NaraG2b => "nara_g2b",
            Self::Comsigan => "comsigan",
            Self::OpenGoKr => "open_go_kr",
        }
    }
}

impl Display for Site {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(self.key())
    }
}

fn or_empty(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}
