use chrono::{DateTime, Utc};
use serde::Deserialize;

/// The language cards are rendered in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    En,
    /// Norwegian (bokmål).
    #[default]
    No,
}

impl Locale {
    /// Picks the locale from a page path; English pages live under `/en`.
    pub fn from_path(path: &str) -> Self {
        if path.starts_with("/en") {
            Self::En
        } else {
            Self::No
        }
    }

    pub fn today(self) -> &'static str {
        match self {
            Self::En => "Today",
            Self::No => "I dag",
        }
    }

    pub fn yesterday(self) -> &'static str {
        match self {
            Self::En => "Yesterday",
            Self::No => "I går",
        }
    }

    pub fn load_failed(self) -> &'static str {
        match self {
            Self::En => "Could not load data",
            Self::No => "Kunne ikke laste data",
        }
    }

    pub fn see_repo(self) -> &'static str {
        match self {
            Self::En => "See repo on GitHub",
            Self::No => "Se repo på GitHub",
        }
    }

    pub fn no_description(self) -> &'static str {
        match self {
            Self::En => "No description",
            Self::No => "Ingen beskrivelse",
        }
    }

    pub fn updated(self) -> &'static str {
        match self {
            Self::En => "Updated",
            Self::No => "Oppdatert",
        }
    }

    fn ago(self, n: i64, unit: Unit) -> String {
        let unit = match (self, unit) {
            (Self::En, Unit::Days) => "days",
            (Self::En, Unit::Weeks) => "weeks",
            (Self::En, Unit::Months) => "months",
            (Self::En, Unit::Years) => "years",
            (Self::No, Unit::Days) => "dager",
            (Self::No, Unit::Weeks) => "uker",
            (Self::No, Unit::Months) => "måneder",
            (Self::No, Unit::Years) => "år",
        };
        match self {
            Self::En => format!("{n} {unit} ago"),
            Self::No => format!("{n} {unit} siden"),
        }
    }

    /// Formats how long ago `then` was, in whole days, weeks, months or years.
    ///
    /// Timestamps in the future count as today.
    pub fn relative_time(self, then: DateTime<Utc>, now: DateTime<Utc>) -> String {
        let days = (now - then).num_days().max(0);
        match days {
            0 => self.today().to_owned(),
            1 => self.yesterday().to_owned(),
            2..=6 => self.ago(days, Unit::Days),
            7..=29 => self.ago(days / 7, Unit::Weeks),
            30..=364 => self.ago(days / 30, Unit::Months),
            _ => self.ago(days / 365, Unit::Years),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Unit {
    Days,
    Weeks,
    Months,
    Years,
}
