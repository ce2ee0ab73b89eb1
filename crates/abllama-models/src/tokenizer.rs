//! Byte-level tokenizer used by the mock backend.

use abllama_abstraction::{BackendError, SpecialTokens, TokenId, TokenSequence, Tokenizer};

const PAD: TokenId = 0;
const BOS: TokenId = 1;
const EOS: TokenId = 2;
const BYTE_OFFSET: TokenId = 3;

/// Vocabulary size: three special tokens followed by the 256 byte values.
pub const BYTE_VOCAB_SIZE: usize = 259;

/// Maps every UTF-8 byte to its own token id, offset past the special tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl ByteTokenizer {
    pub fn new() -> Self {
        Self
    }
}

impl Tokenizer for ByteTokenizer {
    fn tokenize(&self, text: &str) -> Result<TokenSequence, BackendError> {
        let mut tokens = Vec::with_capacity(text.len() + 1);
        tokens.push(BOS);
        tokens.extend(text.bytes().map(|b| TokenId::from(b) + BYTE_OFFSET));
        Ok(TokenSequence::new(tokens))
    }

    fn detokenize(&self, tokens: &TokenSequence, skip_special_tokens: bool) -> Result<String, BackendError> {
        let mut bytes = Vec::with_capacity(tokens.len());
        for &token in tokens.as_slice() {
            match token {
                PAD | BOS | EOS if skip_special_tokens => {}
                PAD => bytes.extend_from_slice(b"<pad>"),
                BOS => bytes.extend_from_slice(b"<s>"),
                EOS => bytes.extend_from_slice(b"</s>"),
                t => {
                    let byte = u8::try_from(t - BYTE_OFFSET)
                        .map_err(|_| BackendError::Tokenizer(format!("token id {t} is outside the vocabulary")))?;
                    bytes.push(byte);
                }
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn special_tokens(&self) -> SpecialTokens {
        SpecialTokens { bos: BOS, eos: EOS, pad: PAD }
    }
}
