//! Named-entity extraction used by the router to re-address messages.

/// Surface forms of named entities in `text`, in order of appearance.
pub trait EntityExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<String>;
}

/// Treats every capitalised word as a proper noun.
///
/// Words are runs of letters, digits and `_`; a word counts when its first
/// character is uppercase.  Possessive `'s` is not part of the word, so
/// "Carol's" yields "Carol".
#[derive(Debug, Clone, Copy, Default)]
pub struct ProperNounExtractor;

impl EntityExtractor for ProperNounExtractor {
    fn extract(&self, text: &str) -> Vec<String> {
        text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
            .filter(|w| w.chars().next().is_some_and(char::is_uppercase))
            .map(str::to_string)
            .collect()
    }
}
