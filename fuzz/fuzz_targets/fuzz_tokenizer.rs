#![no_main]

use libfuzzer_sys::fuzz_target;
use odata_uri::tokenizer::{TokenKind, Tokenizer};

const KINDS: &[TokenKind] = &[
    TokenKind::Open,
    TokenKind::Close,
    TokenKind::Comma,
    TokenKind::Slash,
    TokenKind::Whitespace,
    TokenKind::Null,
    TokenKind::Boolean,
    TokenKind::String,
    TokenKind::Guid,
    TokenKind::DateTimeOffset,
    TokenKind::Date,
    TokenKind::TimeOfDay,
    TokenKind::Duration,
    TokenKind::Binary,
    TokenKind::Enum,
    TokenKind::Double,
    TokenKind::Decimal,
    TokenKind::Integer,
    TokenKind::Alias,
    TokenKind::QualifiedName,
    TokenKind::Identifier,
    TokenKind::Eq,
    TokenKind::And,
    TokenKind::Or,
    TokenKind::Not,
    TokenKind::SearchPhrase,
    TokenKind::SearchWord,
];

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 {
        return;
    }
    if let Ok(s) = std::str::from_utf8(data) {
        let mut tokenizer = Tokenizer::new(s);
        loop {
            if tokenizer.next(TokenKind::End) {
                break;
            }
            let before = tokenizer.position();
            if !KINDS.iter().any(|k| tokenizer.next(*k)) {
                break;
            }
            let _ = tokenizer.text();
            if tokenizer.position() <= before {
                break;
            }
        }
    }
});
