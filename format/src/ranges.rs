//! Block range strings carried in a care map.
//!
//! A range string is a leading pair count followed by that many
//! comma-separated block numbers, every two of which form a half-open
//! range: `"4,64536,65343,74149,74150"` covers [64536,65343) and
//! [74149,74150). The codec itself passes these strings through verbatim;
//! parsing is opt-in, for diagnostics and for consumers that walk the
//! covered blocks.

/// Size of one storage block in bytes
pub const BLOCK_SIZE: u64 = 4096;

/// Errors produced while parsing a block range string
#[derive(Debug, thiserror::Error)]
pub enum RangeParseError {
    #[error("invalid block number {0:?} in range string")]
    InvalidBlock(String),
    #[error("range count {0} is not a positive even number")]
    InvalidCount(usize),
    #[error("range count {count} does not match {actual} block numbers")]
    CountMismatch { count: usize, actual: usize },
    #[error("invalid range pair [{start}, {end})")]
    InvalidPair { start: u64, end: u64 },
}

/// A parsed set of half-open block ranges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet {
    pairs: Vec<(u64, u64)>,
}

impl RangeSet {
    /// Parse a care map range string
    pub fn parse(s: &str) -> Result<Self, RangeParseError> {
        let tokens: Vec<&str> = s.split(',').collect();

        let count: usize = tokens[0]
            .parse()
            .map_err(|_| RangeParseError::InvalidBlock(tokens[0].to_string()))?;
        if count == 0 || count % 2 != 0 {
            return Err(RangeParseError::InvalidCount(count));
        }
        if count != tokens.len() - 1 {
            return Err(RangeParseError::CountMismatch {
                count,
                actual: tokens.len() - 1,
            });
        }

        let mut pairs = Vec::with_capacity(count / 2);
        for pair in tokens[1..].chunks(2) {
            let start = parse_block(pair[0])?;
            let end = parse_block(pair[1])?;
            if start >= end {
                return Err(RangeParseError::InvalidPair { start, end });
            }
            pairs.push((start, end));
        }

        Ok(Self { pairs })
    }

    /// The (start, end) block pairs in input order
    pub fn pairs(&self) -> &[(u64, u64)] {
        &self.pairs
    }

    /// Total number of blocks covered
    pub fn block_count(&self) -> u64 {
        self.pairs.iter().map(|(start, end)| end - start).sum()
    }

    /// Total number of bytes covered
    pub fn byte_count(&self) -> u64 {
        self.block_count() * BLOCK_SIZE
    }
}

fn parse_block(token: &str) -> Result<u64, RangeParseError> {
    token
        .parse()
        .map_err(|_| RangeParseError::InvalidBlock(token.to_string()))
}
