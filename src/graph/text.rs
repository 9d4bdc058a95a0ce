//! 文本归一化与 n-gram 工具
//!
//! 模糊检索的建索引与重打分都基于这里：小写、标点两侧补空格、去掉越南语/拉丁声调、合并空白。

use std::collections::{HashMap, HashSet};

/// 去掉声调符号，返回基础字母（仅处理小写，调用方先转小写）
fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'ả' | 'ã' | 'ạ' | 'ă' | 'ằ' | 'ắ' | 'ẳ' | 'ẵ' | 'ặ' | 'â' | 'ầ' | 'ấ' | 'ẩ' | 'ẫ'
        | 'ậ' => 'a',
        'è' | 'é' | 'ẻ' | 'ẽ' | 'ẹ' | 'ê' | 'ề' | 'ế' | 'ể' | 'ễ' | 'ệ' => 'e',
        'ì' | 'í' | 'ỉ' | 'ĩ' | 'ị' => 'i',
        'ò' | 'ó' | 'ỏ' | 'õ' | 'ọ' | 'ô' | 'ồ' | 'ố' | 'ổ' | 'ỗ' | 'ộ' | 'ơ' | 'ờ' | 'ớ' | 'ở' | 'ỡ'
        | 'ợ' => 'o',
        'ù' | 'ú' | 'ủ' | 'ũ' | 'ụ' | 'ư' | 'ừ' | 'ứ' | 'ử' | 'ữ' | 'ự' => 'u',
        'ỳ' | 'ý' | 'ỷ' | 'ỹ' | 'ỵ' => 'y',
        'đ' => 'd',
        other => other,
    }
}

/// 归一化：小写、标点独立成词、去声调、合并空白
pub fn normalize(text: &str) -> String {
    let mut padded = String::with_capacity(text.len() + 8);
    for c in text.to_lowercase().chars() {
        if c.is_ascii_punctuation() {
            padded.push(' ');
            padded.push(c);
            padded.push(' ');
        } else {
            padded.push(fold_diacritic(c));
        }
    }
    padded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 字符级 1..=n gram（含空格），用于反向索引
pub fn char_ngrams(text: &str, n: usize) -> HashSet<String> {
    let chars: Vec<char> = normalize(text).chars().collect();
    let mut grams = HashSet::new();
    for size in 1..=n {
        for window in chars.windows(size) {
            grams.insert(window.iter().collect());
        }
    }
    grams
}

/// 词级 1..=n gram，多词 gram 用单个空格连接
pub fn word_ngrams(text: &str, n: usize) -> HashSet<String> {
    let normalized = normalize(text);
    let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    let mut grams = HashSet::new();
    for size in 1..=n {
        for window in words.windows(size) {
            grams.insert(window.join(" "));
        }
    }
    grams
}

/// 交集的加权计数：每个共有 gram 贡献 `1 - weight`，权重越高（越像通用属性词）贡献越小
pub fn weighted_overlap(
    a: &HashSet<String>,
    b: &HashSet<String>,
    weights: &HashMap<String, f32>,
) -> f32 {
    a.intersection(b)
        .map(|gram| 1.0 - weights.get(gram).copied().unwrap_or(0.0))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_accents_and_pads_punctuation() {
        assert_eq!(normalize("Áo  Sơ-mi Đỏ!"), "ao so - mi do !");
    }

    #[test]
    fn test_char_ngrams_sizes() {
        let grams = char_ngrams("ab", 3);
        assert!(grams.contains("a"));
        assert!(grams.contains("ab"));
        assert_eq!(grams.len(), 3);
    }

    #[test]
    fn test_word_ngrams() {
        let grams = word_ngrams("red cotton shirt", 2);
        assert!(grams.contains("cotton"));
        assert!(grams.contains("red cotton"));
        assert!(!grams.contains("red cotton shirt"));
    }

    #[test]
    fn test_weighted_overlap_discounts_common_terms() {
        let a = word_ngrams("red shirt", 1);
        let b = word_ngrams("shirt red", 1);
        let mut weights = HashMap::new();
        weights.insert("red".to_string(), 0.5);
        let score = weighted_overlap(&a, &b, &weights);
        assert!((score - 1.5).abs() < f32::EPSILON);
    }
}
