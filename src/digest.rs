//! WARC related hashing functions.

use std::{fmt::Display, str::FromStr};

use data_encoding::{BASE32, BASE32_NOPAD, BASE64_NOPAD, BASE64URL_NOPAD, HEXLOWER, HEXLOWER_PERMISSIVE};
use digest::Digest as _;

use crate::error::{LoadError, LoadErrorKind};

/// Name of a standardized hashing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AlgorithmName {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl AlgorithmName {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    pub fn output_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha512 => 64,
        }
    }
}

impl Display for AlgorithmName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmName {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = crate::util::to_ascii_lowercase_cow(s);
        let s = remove_compatibility_label(&s);
        match s {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),

            _ => Err(LoadError::new(LoadErrorKind::DigestMismatch).with_snippet(s)),
        }
    }
}

/// Data structure for a hash digest value and the algorithm that produced it.
///
/// Corresponds to the format in the `WARC-Block-Digest` field. The encoded
/// value may be base16, base32, or base64 (standard or URL-safe alphabet);
/// the WARC specification references RFC 3548 without fixing an alphabet and
/// real-world archives mix all three.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    algorithm: AlgorithmName,
    value: Vec<u8>,
}

impl Digest {
    pub fn new(algorithm: AlgorithmName, value: Vec<u8>) -> Self {
        Self { algorithm, value }
    }

    /// Computes the digest of a complete byte slice.
    pub fn of(algorithm: AlgorithmName, data: &[u8]) -> Self {
        let mut hasher = Hasher::new(algorithm);
        hasher.update(data);
        Self::new(algorithm, hasher.finish())
    }

    pub fn algorithm(&self) -> AlgorithmName {
        self.algorithm
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

impl FromStr for Digest {
    type Err = LoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (label, encoded) = s.split_once(":").unwrap_or((s, ""));
        let algorithm: AlgorithmName = label.parse()?;
        let value = decode_value(algorithm.output_len(), encoded)?;

        Ok(Self { algorithm, value })
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.algorithm {
            AlgorithmName::Sha1 => write!(
                f,
                "{}:{}",
                self.algorithm.as_str(),
                BASE32.encode(&self.value)
            ),
            _ => write!(
                f,
                "{}:{}",
                self.algorithm.as_str(),
                HEXLOWER.encode(&self.value)
            ),
        }
    }
}

fn remove_compatibility_label(label: &str) -> &str {
    match label {
        "sha-1" => "sha1",
        "sha-256" => "sha256",
        "sha-512" => "sha512",
        _ => label,
    }
}

/// Decodes a digest value whose base alphabet is determined by its length.
fn decode_value(expected_len: usize, value: &str) -> Result<Vec<u8>, LoadError> {
    let nopad_value = value.trim_end_matches('=');

    let b32_len = BASE32_NOPAD
        .decode_len(nopad_value.len())
        .unwrap_or_default();
    let b64_len = BASE64_NOPAD
        .decode_len(nopad_value.len())
        .unwrap_or_default();
    let hex_len = HEXLOWER_PERMISSIVE
        .decode_len(nopad_value.len())
        .unwrap_or_default();

    let result = {
        if expected_len == b32_len {
            let input = crate::util::to_ascii_uppercase_cow(nopad_value);
            BASE32_NOPAD.decode(input.as_bytes())
        } else if expected_len == b64_len {
            if nopad_value.contains(['-', '_']) {
                BASE64URL_NOPAD.decode(nopad_value.as_bytes())
            } else {
                BASE64_NOPAD.decode(nopad_value.as_bytes())
            }
        } else if expected_len == hex_len {
            HEXLOWER_PERMISSIVE.decode(nopad_value.as_bytes())
        } else {
            return Err(LoadError::new(LoadErrorKind::DigestMismatch)
                .with_snippet(format!("undecodable digest value '{}'", value)));
        }
    };

    result.map_err(|error| {
        LoadError::new(LoadErrorKind::DigestMismatch)
            .with_snippet(format!("undecodable digest value '{}'", value))
            .with_source(error)
    })
}

enum HasherImpl {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Sha512(sha2::Sha512),
}

impl HasherImpl {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(digest) => digest.update(data),
            Self::Sha1(digest) => digest.update(data),
            Self::Sha256(digest) => digest.update(data),
            Self::Sha512(digest) => digest.update(data),
        }
    }

    fn finish(self) -> Vec<u8> {
        match self {
            Self::Md5(digest) => digest.finalize().to_vec(),
            Self::Sha1(digest) => digest.finalize().to_vec(),
            Self::Sha256(digest) => digest.finalize().to_vec(),
            Self::Sha512(digest) => digest.finalize().to_vec(),
        }
    }
}

/// Hashing function abstraction.
pub struct Hasher {
    algorithm: AlgorithmName,
    inner: HasherImpl,
}

impl Hasher {
    pub fn new(algorithm: AlgorithmName) -> Self {
        let inner = Self::make_impl(algorithm);

        Self { algorithm, inner }
    }

    fn make_impl(algorithm: AlgorithmName) -> HasherImpl {
        match &algorithm {
            AlgorithmName::Md5 => HasherImpl::Md5(md5::Md5::new()),
            AlgorithmName::Sha1 => HasherImpl::Sha1(sha1::Sha1::new()),
            AlgorithmName::Sha256 => HasherImpl::Sha256(sha2::Sha256::new()),
            AlgorithmName::Sha512 => HasherImpl::Sha512(sha2::Sha512::new()),
        }
    }

    pub fn algorithm(&self) -> AlgorithmName {
        self.algorithm
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finish(&mut self) -> Vec<u8> {
        let inner = std::mem::replace(&mut self.inner, Self::make_impl(self.algorithm));

        inner.finish()
    }

    /// Finalizes into a [`Digest`], resetting the hasher.
    pub fn finish_digest(&mut self) -> Digest {
        Digest::new(self.algorithm, self.finish())
    }
}

/// Policy for digest verification while reading records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DigestCheckKind {
    /// Do not compute or compare digests at all.
    #[default]
    Off,
    /// Record mismatches on the checker without reporting.
    Silent,
    /// Record mismatches and log them.
    Log,
    /// Fail the read with an error at the first mismatch.
    Raise,
}

impl DigestCheckKind {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Accumulates the digest verification outcome for one record.
///
/// `passed` is tri-state: `None` until a comparison happens, then `Some`.
/// Once `Some(false)`, it never reverts.
#[derive(Debug, Clone, Default)]
pub struct DigestChecker {
    kind: DigestCheckKind,
    passed: Option<bool>,
    problems: Vec<String>,
}

impl DigestChecker {
    pub fn new(kind: DigestCheckKind) -> Self {
        Self {
            kind,
            passed: None,
            problems: Vec::new(),
        }
    }

    pub fn kind(&self) -> DigestCheckKind {
        self.kind
    }

    pub fn passed(&self) -> Option<bool> {
        self.passed
    }

    pub fn problems(&self) -> &[String] {
        &self.problems
    }

    pub(crate) fn record_pass(&mut self) {
        if self.passed.is_none() {
            self.passed = Some(true);
        }
    }

    pub(crate) fn record_problem(&mut self, problem: String) -> Result<(), LoadError> {
        self.passed = Some(false);

        match self.kind {
            DigestCheckKind::Off | DigestCheckKind::Silent => {}
            DigestCheckKind::Log => {
                tracing::warn!(problem, "digest verification failed");
            }
            DigestCheckKind::Raise => {
                let error =
                    LoadError::new(LoadErrorKind::DigestMismatch).with_snippet(problem.clone());
                self.problems.push(problem);
                return Err(error);
            }
        }

        self.problems.push(problem);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA1_B32: &str = "3I42H3S6NNFQ2MSVX7XZKYAYSCX5QBYJ";
    const EMPTY_SHA1_B64: &str = "2jmj7l5rSw0yVb/vlWAYkK/YBwk=";
    const EMPTY_SHA1_B64_ALT: &str = "2jmj7l5rSw0yVb_vlWAYkK_YBwk=";
    const EMPTY_SHA1_B16: &str = "DA39A3EE5E6B4B0D3255BFEF95601890AFD80709";

    #[test]
    fn test_parse_md5() {
        let digest = Digest::from_str("md5:b1946ac92492d2347c6235b4d2611184").unwrap();
        assert_eq!(digest.algorithm, AlgorithmName::Md5);
        assert_eq!(
            &digest.value,
            b"\xb1\x94j\xc9$\x92\xd24|b5\xb4\xd2a\x11\x84"
        );

        let digest = Digest::from_str("MD5:WGKGVSJESLJDI7DCGW2NEYIRQQ======").unwrap();
        assert_eq!(digest.algorithm, AlgorithmName::Md5);
        assert_eq!(
            &digest.value,
            b"\xb1\x94j\xc9$\x92\xd24|b5\xb4\xd2a\x11\x84"
        );
    }

    #[test]
    fn test_parse_sha1_any_alphabet() {
        let expected = Digest::of(AlgorithmName::Sha1, b"");

        for encoded in [
            EMPTY_SHA1_B32,
            EMPTY_SHA1_B64,
            EMPTY_SHA1_B64_ALT,
            EMPTY_SHA1_B16,
            &EMPTY_SHA1_B16.to_lowercase(),
        ] {
            let digest = Digest::from_str(&format!("sha1:{}", encoded)).unwrap();
            assert_eq!(digest, expected, "alphabet {}", encoded);
        }
    }

    #[test]
    fn test_parse_sha1_mismatched_value() {
        let tampered = EMPTY_SHA1_B32.replace("3I", "XX");
        let digest = Digest::from_str(&format!("sha1:{}", tampered)).unwrap();
        assert_ne!(digest, Digest::of(AlgorithmName::Sha1, b""));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Digest::from_str("foo").is_err());
        assert!(Digest::from_str("foo:bar").is_err());
        assert!(Digest::from_str("sha1:tooshort").is_err());
    }

    #[test]
    fn test_to_string() {
        let digest = Digest::new(
            AlgorithmName::Sha1,
            b"\xaa\xf4\xc6\x1d\xdc\xc5\xe8\xa2\xda\xbe\xde\x0f;H,\xd9\xae\xa9CM".to_vec(),
        );

        assert_eq!(digest.to_string(), "sha1:VL2MMHO4YXUKFWV63YHTWSBM3GXKSQ2N");
    }

    #[test]
    fn test_hash_sha1() {
        let mut hasher = Hasher::new(AlgorithmName::Sha1);

        hasher.update("abcdbcdecdefdefgefghfghighijhijkijkljklmklmnlmnomnopnopq".as_bytes());

        let output = hasher.finish();

        assert_eq!(
            &output,
            b"\x84\x98>D\x1c;\xd2n\xba\xaeJ\xa1\xf9Q)\xe5\xe5Fp\xf1"
        )
    }

    #[test]
    fn test_checker_monotone() {
        let mut checker = DigestChecker::new(DigestCheckKind::Silent);
        assert_eq!(checker.passed(), None);

        checker.record_pass();
        assert_eq!(checker.passed(), Some(true));

        checker.record_problem("block digest failed".to_string()).unwrap();
        assert_eq!(checker.passed(), Some(false));

        checker.record_pass();
        assert_eq!(checker.passed(), Some(false));
        assert_eq!(checker.problems().len(), 1);
    }

    #[test]
    fn test_checker_raise() {
        let mut checker = DigestChecker::new(DigestCheckKind::Raise);
        assert!(checker.record_problem("payload digest failed".to_string()).is_err());
        assert_eq!(checker.passed(), Some(false));
    }
}
