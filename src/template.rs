//! Typed path template expansion
//!
//! Source and buffer paths are configured as strings with `$` tokens
//! (`$yyyy $mm $dd $HH $MM $ensemble $subset`) that are substituted with
//! zero-padded values before any file-system access. Unknown tokens are a
//! configuration error, never passed through silently.

use crate::errors::{HydrobufError, Result};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::collections::BTreeSet;

/// The closed set of tokens recognized in path templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Token {
    /// `$yyyy` - four-digit year
    Year,
    /// `$mm` - two-digit month
    Month,
    /// `$dd` - two-digit day
    Day,
    /// `$HH` - two-digit hour
    Hour,
    /// `$MM` - two-digit minute
    Minute,
    /// `$ensemble` - ensemble member label
    Ensemble,
    /// `$subset` - zero-padded chunk id
    Subset,
}

impl Token {
    fn parse(name: &str) -> Option<Token> {
        match name {
            "yyyy" => Some(Token::Year),
            "mm" => Some(Token::Month),
            "dd" => Some(Token::Day),
            "HH" => Some(Token::Hour),
            "MM" => Some(Token::Minute),
            "ensemble" => Some(Token::Ensemble),
            "subset" => Some(Token::Subset),
            _ => None,
        }
    }

    /// The token name as written in templates, without the `$` sigil.
    pub fn name(&self) -> &'static str {
        match self {
            Token::Year => "yyyy",
            Token::Month => "mm",
            Token::Day => "dd",
            Token::Hour => "HH",
            Token::Minute => "MM",
            Token::Ensemble => "ensemble",
            Token::Subset => "subset",
        }
    }
}

/// Values available for substitution in one expansion.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateValues<'a> {
    pub time: Option<NaiveDateTime>,
    pub ensemble: Option<&'a str>,
    pub subset: Option<&'a str>,
}

impl<'a> TemplateValues<'a> {
    /// Values for a time-keyed expansion without ensemble or chunk tokens.
    pub fn at(time: NaiveDateTime) -> Self {
        TemplateValues {
            time: Some(time),
            ..Default::default()
        }
    }

    pub fn with_ensemble(mut self, label: Option<&'a str>) -> Self {
        self.ensemble = label;
        self
    }

    pub fn with_subset(mut self, label: &'a str) -> Self {
        self.subset = Some(label);
        self
    }

    fn substitution(&self, token: Token, template: &str) -> Result<String> {
        let missing = |what: &str| HydrobufError::Config {
            message: format!(
                "template '{}' requires a {} value but none was supplied",
                template, what
            ),
        };

        match token {
            Token::Year | Token::Month | Token::Day | Token::Hour | Token::Minute => {
                let time = self.time.ok_or_else(|| missing("time"))?;
                Ok(match token {
                    Token::Year => format!("{:04}", time.year()),
                    Token::Month => format!("{:02}", time.month()),
                    Token::Day => format!("{:02}", time.day()),
                    Token::Hour => format!("{:02}", time.hour()),
                    Token::Minute => format!("{:02}", time.minute()),
                    _ => unreachable!(),
                })
            }
            Token::Ensemble => Ok(self
                .ensemble
                .ok_or_else(|| missing("ensemble member"))?
                .to_string()),
            Token::Subset => Ok(self.subset.ok_or_else(|| missing("chunk label"))?.to_string()),
        }
    }
}

/// Expand every `$` token in `template` using `values`.
///
/// # Errors
///
/// [`HydrobufError::UnknownTemplateToken`] for a token outside the closed
/// set, [`HydrobufError::Config`] when a recognized token has no value.
pub fn expand(template: &str, values: &TemplateValues) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];

        let name_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        let name = &rest[..name_len];

        let token = Token::parse(name).ok_or_else(|| HydrobufError::UnknownTemplateToken {
            token: name.to_string(),
            template: template.to_string(),
        })?;

        out.push_str(&values.substitution(token, template)?);
        rest = &rest[name_len..];
    }

    out.push_str(rest);
    Ok(out)
}

/// List the tokens a template uses, validating it in the process.
pub fn required_tokens(template: &str) -> Result<BTreeSet<Token>> {
    let mut tokens = BTreeSet::new();
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        rest = &rest[pos + 1..];
        let name_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        let token = Token::parse(name).ok_or_else(|| HydrobufError::UnknownTemplateToken {
            token: name.to_string(),
            template: template.to_string(),
        })?;
        tokens.insert(token);
        rest = &rest[name_len..];
    }

    Ok(tokens)
}
