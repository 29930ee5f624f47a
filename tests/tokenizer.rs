use hat_check::tokenizer::{ClipTokenizer, END_OF_TEXT, MAX_LENGTH, START_OF_TEXT};
use hat_check::HatCheckError;
use std::collections::HashMap;

const MERGES: &str = "#version: 0.2\nh a\nha t</w>\nha n\nhan d\nhand s</w>\n";

fn tokenizer() -> ClipTokenizer {
    let vocab: HashMap<String, i64> = [
        ("hat</w>", 3801),
        ("hands</w>", 3500),
        ("a</w>", 320),
        (".</w>", 269),
        ("1</w>", 272),
        ("2</w>", 273),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    ClipTokenizer::from_parts(vocab, MERGES).unwrap()
}

#[test]
fn merges_words_by_rank() {
    let t = tokenizer();
    assert_eq!(t.encode("hat").unwrap(), vec![START_OF_TEXT, 3801, END_OF_TEXT]);
    assert_eq!(t.encode("hands").unwrap(), vec![START_OF_TEXT, 3500, END_OF_TEXT]);
}

#[test]
fn normalises_case_whitespace_and_punctuation() {
    let t = tokenizer();
    assert_eq!(
        t.encode("  A   HAT. ").unwrap(),
        vec![START_OF_TEXT, 320, 3801, 269, END_OF_TEXT]
    );
}

#[test]
fn digits_are_split() {
    let t = tokenizer();
    assert_eq!(t.encode("12").unwrap(), vec![START_OF_TEXT, 272, 273, END_OF_TEXT]);
}

#[test]
fn unknown_word_is_rejected() {
    let err = tokenizer().encode("scarf").unwrap_err();
    assert!(matches!(err, HatCheckError::Vocabulary(_)));
}

#[test]
fn long_prompts_are_truncated() {
    let ids = tokenizer().encode(&"hat ".repeat(100)).unwrap();
    assert_eq!(ids.len(), MAX_LENGTH);
    assert_eq!(ids.last(), Some(&END_OF_TEXT));
}

#[test]
fn batch_pads_to_longest_prompt() {
    let batch = tokenizer().encode_batch(&["hat", "a hat."]).unwrap();
    assert_eq!(batch.rows, 2);
    assert_eq!(batch.seq_len, 5);
    assert_eq!(
        batch.ids,
        vec![
            START_OF_TEXT, 3801, END_OF_TEXT, END_OF_TEXT, END_OF_TEXT,
            START_OF_TEXT, 320, 3801, 269, END_OF_TEXT,
        ]
    );
    assert_eq!(batch.attention_mask, vec![1, 1, 1, 0, 0, 1, 1, 1, 1, 1]);
}
