//! Streaming placeholder substitution
//!
//! Substitution never changes a byte outside a matched token. A token whose
//! key has no binding is written back unchanged and reported as missing.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::fsutil;
use crate::stream::{DEFAULT_CHUNK_SIZE, Segment, SegmentStream};
use crate::token::{MarkerMode, TokenScanner};

/// Whether a pass may write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    DryRun,
    Commit,
}

/// What a pass over one file found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    /// Keys that were found and bound
    pub matched: BTreeSet<String>,
    /// Keys that were found but have no binding
    pub missing: BTreeSet<String>,
    /// Number of tokens replaced
    pub replacements: usize,
}

impl Substitution {
    pub fn is_empty(&self) -> bool {
        self.matched.is_empty() && self.missing.is_empty()
    }
}

/// Builder for [`Substitutor`]
pub struct SubstitutorBuilder {
    markers: MarkerMode,
    chunk_size: usize,
    require_utf8: bool,
}

impl Default for SubstitutorBuilder {
    fn default() -> Self {
        Self {
            markers: MarkerMode::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            require_utf8: true,
        }
    }
}

impl SubstitutorBuilder {
    pub fn markers(mut self, markers: MarkerMode) -> Self {
        self.markers = markers;
        self
    }

    /// Read size; values below 1 are raised to 1
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Reject input that is not valid UTF-8
    pub fn require_utf8(mut self, require: bool) -> Self {
        self.require_utf8 = require;
        self
    }

    pub fn build(self) -> Substitutor {
        Substitutor {
            scanner: TokenScanner::new(self.markers),
            chunk_size: self.chunk_size,
            require_utf8: self.require_utf8,
        }
    }
}

/// Replaces tokens with their bound values
pub struct Substitutor {
    scanner: TokenScanner,
    chunk_size: usize,
    require_utf8: bool,
}

impl Default for Substitutor {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Substitutor {
    pub fn builder() -> SubstitutorBuilder {
        SubstitutorBuilder::default()
    }

    /// Stream `reader` into `out`, replacing bound tokens
    ///
    /// `name` is only used in error messages.
    pub fn rewrite<R: Read, W: Write>(
        &self,
        name: &str,
        reader: R,
        values: &HashMap<String, String>,
        out: &mut W,
    ) -> Result<Substitution> {
        let mut result = Substitution::default();
        let mut utf8 = Utf8Check::default();

        for segment in SegmentStream::new(reader, self.scanner, self.chunk_size) {
            let segment = segment?;
            if self.require_utf8 {
                utf8.feed(segment.raw()).map_err(|offset| EngineError::Decode {
                    path: name.to_string(),
                    offset,
                })?;
            }

            match segment {
                Segment::Text(bytes) => out.write_all(&bytes)?,
                Segment::Token { raw, key } => {
                    let key = String::from_utf8_lossy(&key).into_owned();
                    match values.get(&key) {
                        Some(value) => {
                            out.write_all(value.as_bytes())?;
                            result.replacements += 1;
                            result.matched.insert(key);
                        }
                        None => {
                            out.write_all(&raw)?;
                            result.missing.insert(key);
                        }
                    }
                }
            }
        }

        if self.require_utf8 {
            utf8.finish().map_err(|offset| EngineError::Decode {
                path: name.to_string(),
                offset,
            })?;
        }

        Ok(result)
    }

    /// Run one pass over a file
    ///
    /// In dry-run mode a YAML manifest with at least one replacement is
    /// substituted into memory and parsed, so a value that breaks the
    /// manifest is reported before anything is written.
    pub fn process(
        &self,
        path: &Path,
        name: &str,
        values: &HashMap<String, String>,
        mode: WriteMode,
    ) -> Result<Substitution> {
        match mode {
            WriteMode::DryRun if is_manifest(path) => {
                let mut output = Vec::new();
                let result = self.rewrite(name, File::open(path)?, values, &mut output)?;
                if result.replacements > 0 {
                    self.check_manifest(&output, name)?;
                }
                Ok(result)
            }
            WriteMode::DryRun => {
                let file = File::open(path)?;
                self.rewrite(name, file, values, &mut io::sink())
            }
            WriteMode::Commit => self.commit_file(path, name, values),
        }
    }

    /// Substitute a manifest in memory and check that it parses
    pub fn check_file(
        &self,
        path: &Path,
        name: &str,
        values: &HashMap<String, String>,
    ) -> Result<()> {
        let mut output = Vec::new();
        self.rewrite(name, File::open(path)?, values, &mut output)?;
        self.check_manifest(&output, name)
    }

    /// Substitute a file in place
    ///
    /// YAML manifests must still parse after substitution, otherwise the
    /// original file is kept.
    pub fn commit_file(
        &self,
        path: &Path,
        name: &str,
        values: &HashMap<String, String>,
    ) -> Result<Substitution> {
        let source = File::open(path)?;
        fsutil::replace_file(path, |tmp, tmp_path| {
            let result = {
                let mut writer = BufWriter::new(&mut *tmp);
                let result = self.rewrite(name, source, values, &mut writer)?;
                writer.flush()?;
                result
            };
            if is_manifest(path) {
                self.check_manifest(&std::fs::read(tmp_path)?, name)?;
            }
            tracing::debug!(file = name, replacements = result.replacements, "substituted");
            Ok(result)
        })
    }

    /// Parse every document of a substituted manifest
    ///
    /// Tokens left without a binding are masked first: they stay in the
    /// output as literals and only count as warnings.
    pub fn check_manifest(&self, bytes: &[u8], name: &str) -> Result<()> {
        let parse_error = |message: String| EngineError::ManifestParse {
            path: name.to_string(),
            message,
        };
        let text = std::str::from_utf8(bytes).map_err(|e| parse_error(e.to_string()))?;
        let masked = self.scanner.mask(text);
        for document in serde_yaml::Deserializer::from_str(&masked.text) {
            serde_yaml::Value::deserialize(document).map_err(|e| parse_error(e.to_string()))?;
        }
        Ok(())
    }
}

/// Files that must remain parseable YAML
pub fn is_manifest(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

/// Incremental UTF-8 validation across arbitrary split points
#[derive(Default)]
struct Utf8Check {
    /// Incomplete sequence at the end of the last input
    pending: Vec<u8>,
    /// Bytes fully validated so far
    offset: u64,
}

impl Utf8Check {
    fn feed(&mut self, bytes: &[u8]) -> std::result::Result<(), u64> {
        let joined;
        let data = if self.pending.is_empty() {
            bytes
        } else {
            joined = [self.pending.as_slice(), bytes].concat();
            joined.as_slice()
        };

        match std::str::from_utf8(data) {
            Ok(_) => {
                self.offset += data.len() as u64;
                self.pending.clear();
                Ok(())
            }
            Err(e) => {
                let valid = e.valid_up_to();
                if e.error_len().is_some() {
                    return Err(self.offset + valid as u64);
                }
                self.offset += valid as u64;
                self.pending = data[valid..].to_vec();
                Ok(())
            }
        }
    }

    fn finish(&self) -> std::result::Result<(), u64> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(self.offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn run(
        substitutor: &Substitutor,
        input: &[u8],
        bound: &HashMap<String, String>,
    ) -> (Vec<u8>, Substitution) {
        let mut out = Vec::new();
        let result = substitutor.rewrite("test", input, bound, &mut out).unwrap();
        (out, result)
    }

    #[test]
    fn test_bound_and_missing_keys() {
        let substitutor = Substitutor::default();
        let bound = values(&[("FOO", "bar")]);
        let (out, result) = run(&substitutor, b"x: \x02FOO\x03\ny: \x02BAZ\x03\n", &bound);

        assert_eq!(out, b"x: bar\ny: \x02BAZ\x03\n".to_vec());
        assert_eq!(result.replacements, 1);
        assert!(result.matched.contains("FOO"));
        assert!(result.missing.contains("BAZ"));
    }

    #[test]
    fn test_escaped_markers() {
        let substitutor = Substitutor::default();
        let bound = values(&[("REPLICAS", "3")]);
        let (out, _) = run(&substitutor, br"replicas: \x02REPLICAS\x03", &bound);
        assert_eq!(out, b"replicas: 3".to_vec());

        let strict = Substitutor::builder().markers(MarkerMode::MarkersOnly).build();
        let (out, result) = run(&strict, br"replicas: \x02REPLICAS\x03", &bound);
        assert_eq!(out, br"replicas: \x02REPLICAS\x03".to_vec());
        assert!(result.is_empty());
    }

    #[test]
    fn test_output_independent_of_chunk_size() {
        let bound = values(&[("NAME", "web-frontend"), ("PORT", "8080")]);
        let input = "app: \x02NAME\x03\nport: \\x02PORT\\x03\n中文: \x02NAME\\x03 \x02UNKNOWN\x03\n".as_bytes();
        let (expected, _) = run(&Substitutor::builder().chunk_size(1 << 16).build(), input, &bound);

        for chunk_size in 1..input.len() {
            let substitutor = Substitutor::builder().chunk_size(chunk_size).build();
            let (out, result) = run(&substitutor, input, &bound);
            assert_eq!(out, expected, "chunk size {}", chunk_size);
            assert_eq!(result.replacements, 3);
        }
    }

    #[test]
    fn test_plain_input_is_byte_exact() {
        let substitutor = Substitutor::builder().chunk_size(3).build();
        let input = "no tokens here\r\n\tjust \\x text 中文\n".as_bytes();
        let (out, result) = run(&substitutor, input, &HashMap::new());
        assert_eq!(out, input.to_vec());
        assert_eq!(result, Substitution::default());
    }

    #[test]
    fn test_invalid_utf8_is_a_decode_error() {
        let substitutor = Substitutor::builder().chunk_size(2).build();
        let err = substitutor
            .rewrite("bad.yaml", &b"ok \xff\xfe"[..], &HashMap::new(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Decode { offset: 3, .. }));

        let lenient = Substitutor::builder().require_utf8(false).build();
        let (out, _) = run(&lenient, b"ok \xff", &HashMap::new());
        assert_eq!(out, b"ok \xff".to_vec());
    }

    #[test]
    fn test_truncated_utf8_at_end() {
        let substitutor = Substitutor::default();
        let err = substitutor
            .rewrite("cut.txt", &"中".as_bytes()[..2], &HashMap::new(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::Decode { offset: 0, .. }));
    }

    #[test]
    fn test_commit_rewrites_in_place() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("svc.yaml");
        std::fs::write(&path, "name: \x02APP\x03\n").unwrap();

        let substitutor = Substitutor::default();
        let bound = values(&[("APP", "web")]);

        let dry = substitutor
            .process(&path, "svc.yaml", &bound, WriteMode::DryRun)
            .unwrap();
        assert_eq!(dry.replacements, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "name: \x02APP\x03\n");

        let committed = substitutor
            .process(&path, "svc.yaml", &bound, WriteMode::Commit)
            .unwrap();
        assert_eq!(committed, dry);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "name: web\n");
    }

    #[test]
    fn test_commit_keeps_original_when_manifest_breaks() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.yaml");
        let original = "spec:\n  value: \x02VALUE\x03\n";
        std::fs::write(&path, original).unwrap();

        let substitutor = Substitutor::default();
        let bound = values(&[("VALUE", "[unclosed")]);
        let err = substitutor.commit_file(&path, "broken.yaml", &bound).unwrap_err();

        assert!(matches!(err, EngineError::ManifestParse { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_dry_run_reports_broken_manifest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("configmap-a.yaml");
        let original = "data:\n  value: \x02VALUE\x03\n";
        std::fs::write(&path, original).unwrap();

        let substitutor = Substitutor::default();
        let bound = values(&[("VALUE", "[unclosed")]);
        let err = substitutor
            .process(&path, "configmap-a.yaml", &bound, WriteMode::DryRun)
            .unwrap_err();

        assert!(matches!(err, EngineError::ManifestParse { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_unbound_token_in_manifest_is_not_a_parse_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("namespace-a.yaml");
        std::fs::write(&path, "name: \x02NS\x03\nv: \x02UNDEFINED\x03\n").unwrap();

        let substitutor = Substitutor::default();
        let bound = values(&[("NS", "shop")]);
        let dry = substitutor
            .process(&path, "namespace-a.yaml", &bound, WriteMode::DryRun)
            .unwrap();
        assert!(dry.missing.contains("UNDEFINED"));

        substitutor.commit_file(&path, "namespace-a.yaml", &bound).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "name: shop\nv: \x02UNDEFINED\x03\n"
        );
    }

    #[test]
    fn test_non_manifest_is_not_parsed() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("init.sh");
        std::fs::write(&path, "echo \x02VALUE\x03\n").unwrap();

        let substitutor = Substitutor::default();
        let bound = values(&[("VALUE", "[unclosed")]);
        substitutor.commit_file(&path, "init.sh", &bound).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "echo [unclosed\n");
    }

    #[test]
    fn test_is_manifest() {
        assert!(is_manifest(Path::new("a/deployment-web.yaml")));
        assert!(is_manifest(Path::new("a/b.YML")));
        assert!(!is_manifest(Path::new("scripts/init.sh")));
        assert!(!is_manifest(Path::new("yaml")));
    }
}
