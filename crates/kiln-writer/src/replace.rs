//! Hash-reference substitution over whole values and byte streams.
//!
//! Every occurrence of a fixed-width token with an entry in the [`TokenMap`]
//! is replaced by its mapped value. Unmapped tokens are left as they are.
//! Results do not depend on how a stream is split into chunks.

use std::borrow::Cow;
use std::sync::{Arc, LazyLock};

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use memchr::memmem;

use crate::content::{ByteStream, Contents};
use crate::hash_ref::{HASH_REF_LEN, HASH_REF_PREFIX, TokenMap};

static PREFIX: LazyLock<memmem::Finder<'static>> =
    LazyLock::new(|| memmem::Finder::new(HASH_REF_PREFIX.as_bytes()));

/// Scan `buf` from the start and substitute every complete token.
///
/// Writes replaced output for `buf[..end]` into `out` and returns `end`, the
/// offset of the first byte not yet emitted. Bytes from `hold_from` on are
/// never emitted unless they belong to a complete token.
///
/// Only a mapped token consumes its whole window. An unmapped window gives
/// up just its prefix, so a token starting inside it is still found. The
/// prefix cannot overlap itself, so no match is skipped.
fn substitute(buf: &[u8], hold_from: usize, tokens: &TokenMap, out: &mut Vec<u8>) -> usize {
    let mut cursor = 0;

    while let Some(offset) = PREFIX.find(&buf[cursor..]) {
        let start = cursor + offset;
        if start + HASH_REF_LEN > buf.len() {
            break;
        }
        let window = &buf[start..start + HASH_REF_LEN];
        match tokens.get_bytes(window) {
            Some(hash) => {
                out.extend_from_slice(&buf[cursor..start]);
                out.extend_from_slice(hash);
                cursor = start + HASH_REF_LEN;
            }
            None => {
                let next = start + HASH_REF_PREFIX.len();
                out.extend_from_slice(&buf[cursor..next]);
                cursor = next;
            }
        }
    }

    let end = cursor.max(hold_from);
    out.extend_from_slice(&buf[cursor..end]);
    end
}

/// Replace tokens in a fully materialized value.
///
/// Borrows the input when it contains no token prefix at all.
pub fn replace_hash_refs<'a>(content: &'a [u8], tokens: &TokenMap) -> Cow<'a, [u8]> {
    if PREFIX.find(content).is_none() {
        return Cow::Borrowed(content);
    }
    let mut out = Vec::with_capacity(content.len());
    substitute(content, content.len(), tokens, &mut out);
    Cow::Owned(out)
}

/// Incremental replacer for chunked input.
///
/// Holds back at most `HASH_REF_LEN - 1` bytes between chunks: the tail that
/// could still be the start of a token split across a chunk boundary.
#[derive(Debug)]
pub struct HashRefReplacer {
    tokens: Arc<TokenMap>,
    carry: Vec<u8>,
}

impl HashRefReplacer {
    pub fn new(tokens: Arc<TokenMap>) -> Self {
        Self {
            tokens,
            carry: Vec::with_capacity(HASH_REF_LEN),
        }
    }

    /// Feed the next chunk; returns the bytes that are now final.
    pub fn push(&mut self, chunk: &[u8]) -> Bytes {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(chunk);

        let hold_from = buf.len().saturating_sub(HASH_REF_LEN - 1);
        let mut out = Vec::with_capacity(buf.len());
        let end = substitute(&buf, hold_from, &self.tokens, &mut out);

        buf.drain(..end);
        self.carry = buf;
        Bytes::from(out)
    }

    /// Flush the carry-over unchanged. It cannot hold a complete token.
    pub fn finish(&mut self) -> Bytes {
        Bytes::from(std::mem::take(&mut self.carry))
    }

    pub fn pending(&self) -> usize {
        self.carry.len()
    }
}

/// Wrap a stream so that tokens are replaced as chunks flow through.
pub fn replace_stream(source: ByteStream, tokens: Arc<TokenMap>) -> ByteStream {
    let state = Some((source, HashRefReplacer::new(tokens)));
    stream::unfold(state, |state| async move {
        let (mut source, mut replacer) = state?;
        loop {
            match source.next().await {
                Some(Ok(chunk)) => {
                    let out = replacer.push(&chunk);
                    if !out.is_empty() {
                        return Some((Ok(out), Some((source, replacer))));
                    }
                }
                Some(Err(e)) => return Some((Err(e), None)),
                None => {
                    let rest = replacer.finish();
                    return (!rest.is_empty()).then_some((Ok(rest), None));
                }
            }
        }
    })
    .boxed()
}

/// Apply substitution to bundle content of either shape.
pub fn replace_contents(contents: Contents, tokens: &Arc<TokenMap>) -> Contents {
    match contents {
        Contents::Blob(bytes) => match replace_hash_refs(&bytes, tokens) {
            Cow::Borrowed(_) => Contents::Blob(bytes),
            Cow::Owned(replaced) => Contents::Blob(Bytes::from(replaced)),
        },
        Contents::Stream(stream) => Contents::Stream(replace_stream(stream, tokens.clone())),
    }
}
