use jieba_rs::Jieba;
use std::collections::HashSet;
use std::sync::OnceLock;

static SEGMENTER: OnceLock<Jieba> = OnceLock::new();

pub const DEFAULT_STOPWORDS: &[&str] = &[
    "的", "了", "吗", "吧", "啊", "哦", "嗯", "恩", "你", "我", "他", "她", "它", "这", "那",
    "就", "都", "又", "a", "an", "the", "is", "are", "am", "was", "be", "to", "of", "and", "or",
    "i", "you", "it",
];

fn segmenter() -> &'static Jieba {
    SEGMENTER.get_or_init(Jieba::new)
}

/// Word segmentation for mixed CJK and latin text.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    stopwords: HashSet<String>,
}

impl Tokenizer {
    pub fn new(stopwords: Option<&[String]>) -> Self {
        let stopwords = match stopwords {
            Some(words) => words.iter().map(|w| w.to_lowercase()).collect(),
            None => DEFAULT_STOPWORDS.iter().map(|w| w.to_string()).collect(),
        };
        Self { stopwords }
    }

    /// Lowercases, blanks out everything that is not a word character,
    /// segments, and drops stopwords and empty tokens.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let cleaned: String = text
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
            .collect();
        if cleaned.trim().is_empty() {
            return Vec::new();
        }

        segmenter()
            .cut(&cleaned, true)
            .into_iter()
            .map(str::trim)
            .filter(|w| !w.is_empty() && !self.stopwords.contains(*w))
            .map(str::to_string)
            .collect()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(None)
    }
}
