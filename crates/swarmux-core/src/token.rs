use crate::status;
use sha1::{Digest, Sha1};

pub const DEFAULT_MAX_TOKEN_LEN: usize = 20;

const HASH_SEPARATOR: char = '~';
const HASH_HEX_CHARS: usize = 4;

/// Derives a window token from a task name under a maximum token length.
pub type TokenStrategy = fn(&str, usize) -> String;

/// Token generations in the order `matches` tries them. Windows created by
/// older orchestrator builds stay alive in the server, so a generation is
/// never edited once shipped; new ones are appended.
pub const GENERATIONS: &[TokenStrategy] = &[camel_token, plain_token, hashed_token];

/// Encodes task names into bounded window tokens and recognises tokens from
/// every generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCodec {
    max_len: usize,
}

impl Default for TokenCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOKEN_LEN)
    }
}

impl TokenCodec {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Current-generation token: camelCase, hard-truncated, no ellipsis.
    pub fn encode(&self, name: &str) -> String {
        camel_token(name, self.max_len)
    }

    pub fn legacy_token(&self, name: &str) -> String {
        plain_token(name, self.max_len)
    }

    pub fn hashed_token(&self, name: &str) -> String {
        hashed_token(name, self.max_len)
    }

    /// Strips the status prefix from a window name. `None` means the window is
    /// not a task window.
    pub fn decode<'a>(&self, window_name: &'a str) -> Option<&'a str> {
        status::classify_prefix(window_name).map(|(token, _)| token)
    }

    pub fn matches(&self, token: &str, candidate: &str) -> bool {
        GENERATIONS
            .iter()
            .any(|strategy| strategy(candidate, self.max_len) == token)
    }

    /// Every generation's token for `name`, current first, duplicates removed.
    pub fn generation_tokens(&self, name: &str) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::with_capacity(GENERATIONS.len());
        for strategy in GENERATIONS {
            let token = strategy(name, self.max_len);
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        tokens
    }
}

/// Joins separator-delimited words into camelCase. A separator only
/// capitalises the next character once something has been written, so
/// leading, trailing and doubled separators disappear.
pub fn camel_case(name: &str) -> String {
    let mut output = String::with_capacity(name.len());
    let mut upper_next = false;
    for ch in name.chars() {
        if is_separator(ch) {
            if !output.is_empty() {
                upper_next = true;
            }
            continue;
        }
        if upper_next {
            output.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            output.push(ch);
        }
    }
    output
}

pub fn camel_token(name: &str, max_len: usize) -> String {
    truncate_chars(&camel_case(name), max_len)
}

pub fn plain_token(name: &str, max_len: usize) -> String {
    truncate_chars(name, max_len)
}

pub fn hashed_token(name: &str, max_len: usize) -> String {
    let keep = max_len.saturating_sub(HASH_SEPARATOR.len_utf8() + HASH_HEX_CHARS);
    let digest = sha1_hex(name.as_bytes());
    format!(
        "{}{HASH_SEPARATOR}{}",
        truncate_chars(&camel_case(name), keep),
        &digest[..HASH_HEX_CHARS]
    )
}

fn is_separator(ch: char) -> bool {
    matches!(ch, '-' | '_' | ' ')
}

fn truncate_chars(input: &str, max: usize) -> String {
    input.chars().take(max).collect()
}

fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut output = String::with_capacity(digest.len() * 2);
    for byte in digest {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}
