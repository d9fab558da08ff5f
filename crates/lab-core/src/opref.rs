use anyhow::{anyhow, Result};
use std::fmt;
use std::str::FromStr;

/// Reference to the operation that produced a run.
///
/// Stored on disk as a single line:
/// `<pkg_type>:<pkg_name> <pkg_version> <model_name> <op_name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRef {
    pub pkg_type: String,
    pub pkg_name: String,
    pub pkg_version: String,
    pub model_name: String,
    pub op_name: String,
}

impl OpRef {
    pub fn new(
        pkg_type: &str,
        pkg_name: &str,
        pkg_version: &str,
        model_name: &str,
        op_name: &str,
    ) -> Self {
        Self {
            pkg_type: pkg_type.to_string(),
            pkg_name: pkg_name.to_string(),
            pkg_version: pkg_version.to_string(),
            model_name: model_name.to_string(),
            op_name: op_name.to_string(),
        }
    }

    pub fn to_opspec(&self) -> String {
        if self.model_name.is_empty() {
            self.op_name.clone()
        } else {
            format!("{}:{}", self.model_name, self.op_name)
        }
    }
}

fn encode_token(s: &str) -> &str {
    if s.is_empty() {
        "''"
    } else {
        s
    }
}

fn decode_token(s: &str) -> String {
    if s == "''" {
        String::new()
    } else {
        s.to_string()
    }
}

impl fmt::Display for OpRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {} {} {}",
            encode_token(&self.pkg_type),
            encode_token(&self.pkg_name),
            encode_token(&self.pkg_version),
            encode_token(&self.model_name),
            encode_token(&self.op_name)
        )
    }
}

impl FromStr for OpRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        if parts.len() != 4 {
            return Err(anyhow!("invalid opref (expected 4 tokens): {:?}", s));
        }
        let (pkg_type, pkg_name) = parts[0]
            .split_once(':')
            .ok_or_else(|| anyhow!("invalid opref package token: {:?}", parts[0]))?;
        Ok(Self {
            pkg_type: decode_token(pkg_type),
            pkg_name: decode_token(pkg_name),
            pkg_version: decode_token(parts[1]),
            model_name: decode_token(parts[2]),
            op_name: decode_token(parts[3]),
        })
    }
}
