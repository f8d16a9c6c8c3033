use anyhow::anyhow;
use std::str::FromStr;

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum Environment {
    #[strum(serialize = "development")]
    Development,
    #[strum(serialize = "staging")]
    Staging,
    #[strum(serialize = "production")]
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(identifier: &str) -> Result<Self, Self::Err> {
        Self::from_identifier(identifier)
    }
}

impl Environment {
    pub fn from_identifier(identifier: &str) -> anyhow::Result<Self> {
        match identifier {
            "development" => Ok(Environment::Development),
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            _ => Err(anyhow!("unknown environment identifier: {identifier}")),
        }
    }

    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}
