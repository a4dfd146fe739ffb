//! Event label vocabulary and tokenizer
//!
//! Maps newline-separated event labels to dense integer ids. Id 0 is always
//! the reserved unknown token; observed labels receive ids in order of first
//! appearance. A vocabulary is adapted once and then frozen for the lifetime
//! of the model trained against it.

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

/// Dense token id
pub type TokenId = usize;

/// Label of the reserved out-of-vocabulary token
pub const UNKNOWN_LABEL: &str = "[UNK]";

/// Id of the reserved out-of-vocabulary token
pub const UNKNOWN_ID: TokenId = 0;

/// Separator between corpus records
pub const RECORD_SEPARATOR: char = '\n';

/// Split corpus text into trimmed, non-empty records
pub fn records(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|r| !r.is_empty())
}

/// Frozen label <-> id mapping
///
/// Serialized as the ordered label list; the lookup table is rebuilt on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    labels: Vec<String>,
    ids: FnvHashMap<String, TokenId>,
}

impl Vocabulary {
    /// Build a vocabulary from one or more corpus blocks
    ///
    /// # Example
    /// ```
    /// use vigia::vocabulary::{Vocabulary, UNKNOWN_ID};
    ///
    /// let vocab = Vocabulary::adapt(["unknown\ndiscovery\npairing\ndiscovery"]);
    /// assert_eq!(vocab.size(), 4); // [UNK] + 3 labels
    /// assert_eq!(vocab.tokenize("discovery\nbogus"), vec![2, UNKNOWN_ID]);
    /// ```
    pub fn adapt<'a, I>(corpus: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut vocab = Self {
            labels: vec![UNKNOWN_LABEL.to_string()],
            ids: FnvHashMap::default(),
        };
        vocab.ids.insert(UNKNOWN_LABEL.to_string(), UNKNOWN_ID);

        for block in corpus {
            for record in records(block) {
                if !vocab.ids.contains_key(record) {
                    vocab.ids.insert(record.to_string(), vocab.labels.len());
                    vocab.labels.push(record.to_string());
                }
            }
        }

        vocab
    }

    /// Map every record to its id, unknown labels to [`UNKNOWN_ID`]
    pub fn tokenize(&self, text: &str) -> Vec<TokenId> {
        records(text)
            .map(|r| self.ids.get(r).copied().unwrap_or(UNKNOWN_ID))
            .collect()
    }

    /// Cardinality including the unknown token
    pub fn size(&self) -> usize {
        self.labels.len()
    }

    pub fn id_of(&self, label: &str) -> Option<TokenId> {
        self.ids.get(label).copied()
    }

    pub fn label(&self, id: TokenId) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    /// Decode ids to labels; out-of-range ids decode as the unknown label
    pub fn decode(&self, ids: &[TokenId]) -> Vec<&str> {
        ids.iter()
            .map(|&id| self.label(id).unwrap_or(UNKNOWN_LABEL))
            .collect()
    }

    /// Labels in id order, starting with the unknown token
    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

impl TryFrom<Vec<String>> for Vocabulary {
    type Error = String;

    fn try_from(labels: Vec<String>) -> std::result::Result<Self, Self::Error> {
        if labels.first().map(String::as_str) != Some(UNKNOWN_LABEL) {
            return Err(format!("vocabulary must start with {}", UNKNOWN_LABEL));
        }

        let mut ids = FnvHashMap::default();
        for (id, label) in labels.iter().enumerate() {
            if ids.insert(label.clone(), id).is_some() {
                return Err(format!("duplicate vocabulary label '{}'", label));
            }
        }

        Ok(Self { labels, ids })
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocab: Vocabulary) -> Self {
        vocab.labels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ids_follow_first_appearance() {
        let vocab = Vocabulary::adapt(["b\na\nb\nc"]);
        assert_eq!(vocab.labels(), &["[UNK]", "b", "a", "c"]);
        assert_eq!(vocab.id_of("a"), Some(2));
    }

    #[test]
    fn test_adapt_over_multiple_blocks() {
        let vocab = Vocabulary::adapt(["x\ny", "y\nz\n"]);
        assert_eq!(vocab.size(), 4);
        assert_eq!(vocab.id_of("z"), Some(3));
    }

    #[test]
    fn test_blank_records_and_crlf_are_skipped() {
        let vocab = Vocabulary::adapt(["a\r\n\n  \nb\r\n"]);
        assert_eq!(vocab.size(), 3);
        assert_eq!(vocab.tokenize("a\r\n\nb"), vec![1, 2]);
    }

    #[test]
    fn test_unknown_labels_map_to_reserved_id() {
        let vocab = Vocabulary::adapt(["connected\ndisconnected"]);
        assert_eq!(
            vocab.tokenize("connected\ncall_app\ndisconnected"),
            vec![1, UNKNOWN_ID, 2]
        );
    }

    #[test]
    fn test_decode() {
        let vocab = Vocabulary::adapt(["up\ndown"]);
        assert_eq!(vocab.decode(&[2, 1, 0, 99]), vec!["down", "up", "[UNK]", "[UNK]"]);
    }

    #[test]
    fn test_serde_round_trip() {
        let vocab = Vocabulary::adapt(["one\ntwo\nthree"]);
        let json = serde_json::to_string(&vocab).unwrap();
        assert_eq!(json, r#"["[UNK]","one","two","three"]"#);
        let back: Vocabulary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vocab);
        assert_eq!(back.id_of("three"), Some(3));
    }

    #[test]
    fn test_deserialize_rejects_bad_layouts() {
        assert!(serde_json::from_str::<Vocabulary>(r#"["a","b"]"#).is_err());
        assert!(serde_json::from_str::<Vocabulary>(r#"["[UNK]","a","a"]"#).is_err());
    }

    proptest! {
        #[test]
        fn prop_tokenize_decode_is_identity_on_adapted_corpus(
            labels in proptest::collection::vec("[a-z_]{1,8}", 1..40)
        ) {
            let corpus = labels.join("\n");
            let vocab = Vocabulary::adapt([corpus.as_str()]);
            let ids = vocab.tokenize(&corpus);
            prop_assert!(ids.iter().all(|&id| id != UNKNOWN_ID && id < vocab.size()));
            let decoded = vocab.decode(&ids);
            let expected: Vec<&str> = labels.iter().map(String::as_str).collect();
            prop_assert_eq!(decoded, expected);
        }
    }
}
