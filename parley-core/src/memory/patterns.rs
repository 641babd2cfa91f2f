//! Content classification for memory extraction
//!
//! A classifier is an ordered list of independent matchers. Each matcher
//! carries a tag and reports it when its pattern hits; adding a locale means
//! pushing more matchers, not touching the store.

use super::types::ReactionKind;
use once_cell::sync::Lazy;
use regex::Regex;

/// What a matcher recognises in a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentTag {
    Proposal,
    Decision,
    Position,
    Support,
    Oppose,
}

/// A single tagged pattern
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    tag: ContentTag,
    regex: Regex,
}

impl PatternMatcher {
    pub fn new(tag: ContentTag, pattern: &str) -> crate::Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| crate::Error::Validation(format!("invalid pattern {:?}: {}", pattern, e)))?;
        Ok(Self { tag, regex })
    }

    pub fn tag(&self) -> ContentTag {
        self.tag
    }

    /// The matcher's tag if `text` matches
    pub fn check(&self, text: &str) -> Option<ContentTag> {
        self.regex.is_match(text).then_some(self.tag)
    }
}

// Oppose comes before support so "I don't agree" is not read as agreement.
const DEFAULT_PATTERNS: &[(ContentTag, &str)] = &[
    // Proposals
    (ContentTag::Proposal, r"(?i)\[(proposal|提案)\]"),
    (ContentTag::Proposal, r"(?i)\b(i|we) (propose|suggest|recommend)\b"),
    (ContentTag::Proposal, r"(?i)\bwhat if we\b"),
    (ContentTag::Proposal, r"(?i)\blet'?s (try|consider|adopt)\b"),
    (ContentTag::Proposal, r"(?i)\bmy proposal is\b"),
    (ContentTag::Proposal, r"我(建议|提议)|不如我们"),
    // Decisions and consensus
    (ContentTag::Decision, r"(?i)\[(decision|决定|决议)\]"),
    (ContentTag::Decision, r"(?i)\b(we|everyone) (have |has )?(agreed|decided)\b"),
    (ContentTag::Decision, r"(?i)\b(consensus|final decision)\b"),
    (ContentTag::Decision, r"(?i)\blet'?s go with\b"),
    (ContentTag::Decision, r"我们决定|达成(了)?共识"),
    // Stated positions
    (ContentTag::Position, r"(?i)\b(i believe|i think|in my view|my position is)\b"),
    (ContentTag::Position, r"我(认为|觉得|坚持)"),
    // Reactions
    (ContentTag::Oppose, r"(?i)\b(disagree|don'?t agree|do not agree|object to|oppose)\b"),
    (ContentTag::Oppose, r"(?i)\b(not convinced|won'?t work|i doubt)\b"),
    (ContentTag::Oppose, r"反对|不同意|不赞成"),
    (ContentTag::Support, r"(?i)\b(i agree|agreed|i support|good point|exactly|makes sense)\b"),
    (ContentTag::Support, r"同意|支持|赞成"),
];

static DEFAULT_MATCHERS: Lazy<Vec<PatternMatcher>> = Lazy::new(|| {
    DEFAULT_PATTERNS
        .iter()
        .filter_map(|(tag, pattern)| PatternMatcher::new(*tag, pattern).ok())
        .collect()
});

/// Everything the classifier found in one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub proposal: bool,
    pub decision: bool,
    pub position: bool,
    pub reaction: ReactionKind,
}

/// Ordered set of matchers
#[derive(Debug, Clone)]
pub struct ContentClassifier {
    matchers: Vec<PatternMatcher>,
}

impl ContentClassifier {
    /// A classifier with no matchers; every message is neutral
    pub fn empty() -> Self {
        Self {
            matchers: Vec::new(),
        }
    }

    /// Append a matcher after the existing ones
    pub fn push(&mut self, matcher: PatternMatcher) {
        self.matchers.push(matcher);
    }

    pub fn with_matcher(mut self, matcher: PatternMatcher) -> Self {
        self.push(matcher);
        self
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// Run every matcher; the first support/oppose hit decides the reaction
    pub fn classify(&self, text: &str) -> Classification {
        let mut result = Classification {
            proposal: false,
            decision: false,
            position: false,
            reaction: ReactionKind::Neutral,
        };
        let mut reaction_seen = false;

        for tag in self.matchers.iter().filter_map(|m| m.check(text)) {
            match tag {
                ContentTag::Proposal => result.proposal = true,
                ContentTag::Decision => result.decision = true,
                ContentTag::Position => result.position = true,
                ContentTag::Support if !reaction_seen => {
                    result.reaction = ReactionKind::Support;
                    reaction_seen = true;
                }
                ContentTag::Oppose if !reaction_seen => {
                    result.reaction = ReactionKind::Oppose;
                    reaction_seen = true;
                }
                _ => {}
            }
        }
        result
    }

    pub fn reaction(&self, text: &str) -> ReactionKind {
        self.classify(text).reaction
    }
}

impl Default for ContentClassifier {
    fn default() -> Self {
        Self {
            matchers: DEFAULT_MATCHERS.clone(),
        }
    }
}
