//! Option flags that control how example output is compared and reported.

use std::fmt::{self, Display};

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Comparison and reporting flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OptionFlags: u32 {
        const DONT_ACCEPT_TRUE_FOR_1 = 1 << 0;
        const DONT_ACCEPT_BLANKLINE = 1 << 1;
        const NORMALIZE_WHITESPACE = 1 << 2;
        const ELLIPSIS = 1 << 3;
        const SKIP = 1 << 4;
        const IGNORE_EXCEPTION_DETAIL = 1 << 5;
        const REPORT_UDIFF = 1 << 6;
        const REPORT_CDIFF = 1 << 7;
        const REPORT_NDIFF = 1 << 8;
        const REPORT_ONLY_FIRST_FAILURE = 1 << 9;
        const FAIL_FAST = 1 << 10;
        const ALLOW_UNICODE = 1 << 11;
        const ALLOW_BYTES = 1 << 12;
        const NUMBER = 1 << 13;

        const COMPARISON_FLAGS = Self::DONT_ACCEPT_TRUE_FOR_1.bits()
            | Self::DONT_ACCEPT_BLANKLINE.bits()
            | Self::NORMALIZE_WHITESPACE.bits()
            | Self::ELLIPSIS.bits()
            | Self::SKIP.bits()
            | Self::IGNORE_EXCEPTION_DETAIL.bits()
            | Self::ALLOW_UNICODE.bits()
            | Self::ALLOW_BYTES.bits()
            | Self::NUMBER.bits();
        const REPORTING_FLAGS = Self::REPORT_UDIFF.bits()
            | Self::REPORT_CDIFF.bits()
            | Self::REPORT_NDIFF.bits()
            | Self::REPORT_ONLY_FIRST_FAILURE.bits()
            | Self::FAIL_FAST.bits();
    }
}

impl OptionFlags {
    /// Look up a single flag by name. Composite names are not accepted.
    pub fn by_name(name: &str) -> Option<Self> {
        Self::from_name(name).filter(|flag| flag.bits().count_ones() == 1)
    }

    /// Look up a flag by name, including the composite `COMPARISON_FLAGS`
    /// and `REPORTING_FLAGS` names.
    pub fn by_config_name(name: &str) -> Option<Self> {
        Self::from_name(name)
    }

    /// Names of all single flags, in declaration order.
    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::all()
            .iter_names()
            .map(|(name, _)| name)
            .filter(|name| Self::by_name(name).is_some())
    }

    /// Parse a list of flag names separated by spaces or commas, as found in
    /// configuration files and the environment.
    pub fn parse_names(text: &str) -> Result<Self, OptionError> {
        split_tokens(text).try_fold(Self::empty(), |acc, name| {
            Self::by_config_name(name)
                .map(|flag| acc | flag)
                .ok_or_else(|| OptionError::UnknownFlag(name.to_string()))
        })
    }
}

/// Per-flag on/off overrides layered over a default set of flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptionDelta {
    set: OptionFlags,
    clear: OptionFlags,
}

impl OptionDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.clear.is_empty()
    }

    pub fn enable(&mut self, flag: OptionFlags) {
        self.set.insert(flag);
        self.clear.remove(flag);
    }

    pub fn disable(&mut self, flag: OptionFlags) {
        self.clear.insert(flag);
        self.set.remove(flag);
    }

    /// The override recorded for `flag`, if any.
    pub fn get(&self, flag: OptionFlags) -> Option<bool> {
        if self.set.contains(flag) {
            Some(true)
        } else if self.clear.contains(flag) {
            Some(false)
        } else {
            None
        }
    }

    /// Apply the overrides to `base`.
    pub fn apply(&self, base: OptionFlags) -> OptionFlags {
        (base | self.set) - self.clear
    }

    /// Layer `other` on top of `self`; later overrides win.
    pub fn merge(&mut self, other: &OptionDelta) {
        for flag in other.set.iter() {
            self.enable(flag);
        }
        for flag in other.clear.iter() {
            self.disable(flag);
        }
    }

    /// Parse `+NAME -NAME` tokens separated by spaces or commas.
    pub fn parse(text: &str) -> Result<Self, OptionError> {
        let mut delta = Self::new();
        for token in split_tokens(text) {
            delta.push_token(token)?;
        }
        Ok(delta)
    }

    /// Like [`OptionDelta::parse`], but invalid tokens are skipped and
    /// reported back instead of failing the whole list.
    pub fn parse_lenient(text: &str) -> (Self, Vec<OptionError>) {
        let mut delta = Self::new();
        let mut errors = Vec::new();
        for token in split_tokens(text) {
            if let Err(error) = delta.push_token(token) {
                errors.push(error);
            }
        }
        (delta, errors)
    }

    fn push_token(&mut self, token: &str) -> Result<(), OptionError> {
        let mut chars = token.chars();
        let enable = match chars.next() {
            Some('+') => true,
            Some('-') => false,
            _ => return Err(OptionError::MissingSign(token.to_string())),
        };
        let name = chars.as_str();
        let flag = OptionFlags::by_name(name)
            .ok_or_else(|| OptionError::UnknownFlag(name.to_string()))?;
        if enable {
            self.enable(flag);
        } else {
            self.disable(flag);
        }
        Ok(())
    }
}

impl Display for OptionDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set = self.set.iter_names().map(|(name, _)| ('+', name));
        let clear = self.clear.iter_names().map(|(name, _)| ('-', name));
        let tokens = set
            .chain(clear)
            .map(|(sign, name)| format!("{sign}{name}"))
            .collect::<Vec<_>>();
        f.write_str(&tokens.join(" "))
    }
}

fn split_tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|token| !token.is_empty())
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    #[error("missing '+' or '-' in '{0}' option")]
    MissingSign(String),
    #[error("'{0}' is not a valid option")]
    UnknownFlag(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_name() {
        assert_eq!(OptionFlags::by_name("ELLIPSIS"), Some(OptionFlags::ELLIPSIS));
        assert_eq!(OptionFlags::by_name("COMPARISON_FLAGS"), None);
        assert_eq!(OptionFlags::by_name("ellipsis"), None);
        assert!(OptionFlags::by_config_name("COMPARISON_FLAGS")
            .unwrap()
            .contains(OptionFlags::NORMALIZE_WHITESPACE));
        assert_eq!(OptionFlags::names().count(), 14);
    }

    #[test]
    fn parse_names() {
        let flags = OptionFlags::parse_names("ELLIPSIS, NUMBER  FAIL_FAST").unwrap();
        assert_eq!(
            flags,
            OptionFlags::ELLIPSIS | OptionFlags::NUMBER | OptionFlags::FAIL_FAST
        );
        assert_eq!(
            OptionFlags::parse_names("ELLIPSIS BOGUS"),
            Err(OptionError::UnknownFlag("BOGUS".into()))
        );
    }

    #[test]
    fn delta_apply() {
        let delta = OptionDelta::parse("+ELLIPSIS,-NORMALIZE_WHITESPACE").unwrap();
        let base = OptionFlags::NORMALIZE_WHITESPACE | OptionFlags::NUMBER;
        assert_eq!(delta.apply(base), OptionFlags::ELLIPSIS | OptionFlags::NUMBER);
        assert_eq!(delta.get(OptionFlags::ELLIPSIS), Some(true));
        assert_eq!(delta.get(OptionFlags::NORMALIZE_WHITESPACE), Some(false));
        assert_eq!(delta.get(OptionFlags::SKIP), None);
        assert_eq!(delta.to_string(), "+ELLIPSIS -NORMALIZE_WHITESPACE");
    }

    #[test]
    fn delta_merge_later_wins() {
        let mut delta = OptionDelta::parse("+SKIP +ELLIPSIS").unwrap();
        delta.merge(&OptionDelta::parse("-SKIP").unwrap());
        assert_eq!(delta.apply(OptionFlags::empty()), OptionFlags::ELLIPSIS);
    }

    #[test]
    fn delta_errors() {
        assert_eq!(
            OptionDelta::parse("ELLIPSIS"),
            Err(OptionError::MissingSign("ELLIPSIS".into()))
        );
        assert_eq!(
            OptionDelta::parse("+ELIPSIS"),
            Err(OptionError::UnknownFlag("ELIPSIS".into()))
        );

        let (delta, errors) = OptionDelta::parse_lenient("+ELLIPSIS bogus +NOPE");
        assert_eq!(delta.apply(OptionFlags::empty()), OptionFlags::ELLIPSIS);
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].to_string(), "missing '+' or '-' in 'bogus' option");
        assert_eq!(errors[1].to_string(), "'NOPE' is not a valid option");
    }
}
