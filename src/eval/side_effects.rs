//! Output decorations accumulated by subtags and handed to the output sender at the end
//! of the root execution.

use std::borrow::Cow;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Embed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub color: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content: Vec<u8>,
}

/// Which mentions in the output are allowed to ping.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MentionPolicy {
    pub everyone: bool,
    pub users: Vec<String>,
    pub roles: Vec<String>,
}

/// Regex substitution applied to the final output of the outermost execution.
#[derive(Debug, Clone)]
pub struct OutputReplacement {
    pub regex: Regex,
    pub with: String,
    pub global: bool,
}

impl OutputReplacement {
    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.global {
            self.regex.replace_all(text, self.with.as_str())
        } else {
            self.regex.replace(text, self.with.as_str())
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SideEffects {
    pub embeds: Vec<Embed>,
    pub file: Option<Attachment>,
    pub reactions: Vec<String>,
    pub mentions: MentionPolicy,
    pub replace: Option<OutputReplacement>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replacement_respects_global_flag() {
        let once = OutputReplacement {
            regex: Regex::new("a").unwrap(),
            with: "b".to_string(),
            global: false,
        };
        assert_eq!(once.apply("aaa"), "baa");

        let all = OutputReplacement {
            global: true,
            ..once
        };
        assert_eq!(all.apply("aaa"), "bbb");
    }
}
