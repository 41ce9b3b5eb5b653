//! Descriptor file schema and parser.
//!
//! Descriptors are TOML documents with a top-level `schema` version. The
//! parser is pure: it turns text into an immutable [`PackageDescriptor`] and
//! never evaluates anything from the file.
//!
//! ```toml
//! schema = 1
//!
//! [package]
//! name = "xkbcomp"
//! version = "1.4.7"
//! license = { all_of = ["HPND", "MIT-open-group"] }
//!
//! [[source]]
//! url = "https://example.org/xkbcomp-1.4.7.tar.gz"
//! sha256 = "..."
//!
//! [dependencies]
//! build = ["pkgconf", "autoconf"]
//! run = ["libx11"]
//!
//! [[install]]
//! run = ["./configure", "${std_configure_args}"]
//!
//! [[test]]
//! assert_exists = "${bin}/xkbcomp"
//! ```

use std::collections::HashSet;
use std::io;
use std::path::Path;

use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::core::descriptor::{
    BuildStep, LicenseExpr, PackageDescriptor, Phase, SourceRef, TestAction,
};
use crate::util::hash::normalize_sha256;

/// The descriptor schema version this build understands.
pub const SCHEMA_VERSION: u32 = 1;

/// File extension of descriptor files in a registry directory.
pub const DESCRIPTOR_EXTENSION: &str = "toml";

#[derive(Debug, Error, Diagnostic)]
pub enum DescriptorError {
    #[error("failed to read descriptor {path}")]
    #[diagnostic(code(cellar::descriptor::io))]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse descriptor {path}: {message}")]
    #[diagnostic(code(cellar::descriptor::parse))]
    Parse { path: String, message: String },

    #[error("descriptor {path} uses schema {found}, but only schema {expected} is supported")]
    #[diagnostic(
        code(cellar::descriptor::schema),
        help("Upgrade cellar or rewrite the descriptor for the supported schema")
    )]
    UnsupportedSchema {
        path: String,
        found: u32,
        expected: u32,
    },

    #[error("invalid descriptor {path}: {message}")]
    #[diagnostic(code(cellar::descriptor::invalid))]
    Invalid { path: String, message: String },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    schema: u32,
    package: RawPackage,
    #[serde(default, rename = "source")]
    sources: Vec<RawSource>,
    #[serde(default)]
    dependencies: RawDependencies,
    #[serde(default)]
    install: Vec<RawStep>,
    #[serde(default)]
    test: Vec<RawTestAction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPackage {
    name: String,
    version: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    license: Option<RawLicense>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawLicense {
    Id(String),
    Compound {
        #[serde(default)]
        all_of: Option<Vec<String>>,
        #[serde(default)]
        any_of: Option<Vec<String>>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSource {
    url: String,
    sha256: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDependencies {
    #[serde(default)]
    build: Vec<String>,
    #[serde(default)]
    run: Vec<String>,
    #[serde(default)]
    test: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    #[serde(default)]
    run: Option<Vec<String>>,
    #[serde(default)]
    replace: Option<RawReplace>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawReplace {
    file: String,
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTestAction {
    #[serde(default)]
    write: Option<RawWrite>,
    #[serde(default)]
    run: Option<Vec<String>>,
    #[serde(default)]
    assert_exists: Option<String>,
    #[serde(default)]
    assert_contains: Option<RawContains>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWrite {
    path: String,
    contents: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawContains {
    path: String,
    text: String,
}

/// Load and parse a descriptor file.
pub fn load_descriptor(path: &Path) -> Result<PackageDescriptor, DescriptorError> {
    let text = std::fs::read_to_string(path).map_err(|source| DescriptorError::Io {
        path: path.display().to_string(),
        source,
    })?;

    parse_with_origin(&text, &path.display().to_string(), Some(path))
}

/// Parse descriptor text. `origin` is only used in error messages.
pub fn parse_descriptor(text: &str, origin: &str) -> Result<PackageDescriptor, DescriptorError> {
    parse_with_origin(text, origin, None)
}

fn parse_with_origin(
    text: &str,
    origin: &str,
    path: Option<&Path>,
) -> Result<PackageDescriptor, DescriptorError> {
    let invalid = |message: String| DescriptorError::Invalid {
        path: origin.to_string(),
        message,
    };

    // Check the schema before strict parsing so a newer file reports the
    // version mismatch instead of an unknown field.
    let value: toml::Value = toml::from_str(text).map_err(|e| DescriptorError::Parse {
        path: origin.to_string(),
        message: e.message().to_string(),
    })?;
    match value.get("schema").and_then(|s| s.as_integer()) {
        Some(found) if found != i64::from(SCHEMA_VERSION) => {
            return Err(DescriptorError::UnsupportedSchema {
                path: origin.to_string(),
                found: u32::try_from(found).unwrap_or(u32::MAX),
                expected: SCHEMA_VERSION,
            });
        }
        Some(_) => {}
        None => return Err(invalid("missing integer `schema` field".to_string())),
    }

    let raw: RawDescriptor = toml::from_str(text).map_err(|e| DescriptorError::Parse {
        path: origin.to_string(),
        message: e.message().to_string(),
    })?;
    debug_assert_eq!(raw.schema, SCHEMA_VERSION);

    validate_name(&raw.package.name).map_err(invalid)?;
    if raw.package.version.trim().is_empty() {
        return Err(invalid("package version must not be empty".to_string()));
    }

    let mut builder =
        PackageDescriptor::builder(raw.package.name.as_str(), raw.package.version.trim());

    if let Some(description) = raw.package.description {
        builder = builder.description(description);
    }
    if let Some(homepage) = raw.package.homepage {
        builder = builder.homepage(homepage);
    }
    if let Some(license) = raw.package.license {
        builder = builder.license(convert_license(license).map_err(invalid)?);
    }

    if raw.sources.is_empty() {
        return Err(invalid("at least one [[source]] is required".to_string()));
    }
    for (i, source) in raw.sources.into_iter().enumerate() {
        let url = Url::parse(&source.url)
            .map_err(|e| invalid(format!("source {}: invalid url `{}`: {}", i, source.url, e)))?;
        if !matches!(url.scheme(), "http" | "https" | "file") {
            return Err(invalid(format!(
                "source {}: unsupported url scheme `{}`",
                i,
                url.scheme()
            )));
        }
        let sha256 = normalize_sha256(&source.sha256).ok_or_else(|| {
            invalid(format!(
                "source {}: `{}` is not a sha256 hex digest",
                i, source.sha256
            ))
        })?;
        builder = builder.source(SourceRef::new(url, sha256));
    }

    let mut seen = HashSet::new();
    for (phase, names) in [
        (Phase::Build, raw.dependencies.build),
        (Phase::Run, raw.dependencies.run),
        (Phase::Test, raw.dependencies.test),
    ] {
        for name in names {
            validate_name(&name).map_err(|m| invalid(format!("dependency: {}", m)))?;
            if !seen.insert((name.clone(), phase)) {
                return Err(invalid(format!(
                    "dependency `{}` is listed twice in `{}`",
                    name, phase
                )));
            }
            builder = builder.dependency(name, phase);
        }
    }

    for (i, step) in raw.install.into_iter().enumerate() {
        let step = convert_step(step).map_err(|m| invalid(format!("install step {}: {}", i, m)))?;
        builder = builder.step(step);
    }

    for (i, action) in raw.test.into_iter().enumerate() {
        let action =
            convert_test(action).map_err(|m| invalid(format!("test action {}: {}", i, m)))?;
        builder = builder.test_action(action);
    }

    if let Some(path) = path {
        builder = builder.origin(path);
    }

    Ok(builder.build())
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("package name must not be empty".to_string());
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | '@'));
    if !valid || name.starts_with('.') {
        return Err(format!("invalid package name `{}`", name));
    }
    Ok(())
}

fn convert_license(raw: RawLicense) -> Result<LicenseExpr, String> {
    match raw {
        RawLicense::Id(id) if !id.trim().is_empty() => Ok(LicenseExpr::Id(id)),
        RawLicense::Id(_) => Err("license must not be empty".to_string()),
        RawLicense::Compound {
            all_of: Some(ids),
            any_of: None,
        } if !ids.is_empty() => Ok(LicenseExpr::AllOf(ids)),
        RawLicense::Compound {
            all_of: None,
            any_of: Some(ids),
        } if !ids.is_empty() => Ok(LicenseExpr::AnyOf(ids)),
        RawLicense::Compound { .. } => {
            Err("license table needs exactly one non-empty `all_of` or `any_of`".to_string())
        }
    }
}

fn split_command(mut argv: Vec<String>) -> Result<(String, Vec<String>), String> {
    if argv.is_empty() || argv[0].trim().is_empty() {
        return Err("`run` needs at least a command".to_string());
    }
    let command = argv.remove(0);
    Ok((command, argv))
}

fn convert_step(raw: RawStep) -> Result<BuildStep, String> {
    match (raw.run, raw.replace) {
        (Some(argv), None) => {
            let (command, args) = split_command(argv)?;
            Ok(BuildStep::Run { command, args })
        }
        (None, Some(r)) => {
            if r.from.is_empty() {
                return Err("`replace.from` must not be empty".to_string());
            }
            Ok(BuildStep::Replace {
                file: r.file,
                from: r.from,
                to: r.to,
            })
        }
        _ => Err("expected exactly one of `run` or `replace`".to_string()),
    }
}

fn convert_test(raw: RawTestAction) -> Result<TestAction, String> {
    let RawTestAction {
        write,
        run,
        assert_exists,
        assert_contains,
    } = raw;

    let set = [
        write.is_some(),
        run.is_some(),
        assert_exists.is_some(),
        assert_contains.is_some(),
    ]
    .iter()
    .filter(|b| **b)
    .count();
    if set != 1 {
        return Err(
            "expected exactly one of `write`, `run`, `assert_exists` or `assert_contains`"
                .to_string(),
        );
    }

    if let Some(w) = write {
        return Ok(TestAction::Write {
            path: w.path,
            contents: w.contents,
        });
    }
    if let Some(argv) = run {
        let (command, args) = split_command(argv)?;
        return Ok(TestAction::Run { command, args });
    }
    if let Some(pattern) = assert_exists {
        return Ok(TestAction::AssertExists { pattern });
    }
    match assert_contains {
        Some(c) => Ok(TestAction::AssertContains {
            path: c.path,
            text: c.text,
        }),
        None => Err("empty test action".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const XKBCOMP: &str = r#"
schema = 1

[package]
name = "xkbcomp"
version = "1.4.7"
description = "XKB keyboard description compiler"
homepage = "https://www.x.org"
license = { all_of = ["HPND", "MIT-open-group"] }

[[source]]
url = "https://example.org/xkbcomp/xkbcomp-actions-out-of-bounds.zip"
sha256 = "23a385b73ae3a69c02f1df3d3b52254e098a535033b28fd80eccccc2c9f1e999"

[dependencies]
build = ["pkgconf", "autoconf", "automake", "bison", "libtool", "util-macros", "xorgproto"]
run = ["libx11", "libxkbfile"]

[[install]]
run = ["autoreconf", "--force", "--install"]

[[install]]
run = ["./configure", "--with-xkb-config-root=${root}/share/X11/xkb", "${std_configure_args}"]

[[install]]
run = ["make"]

[[install]]
run = ["make", "install"]

[[install]]
replace = { file = "${lib}/pkgconfig/xkbcomp.pc", from = "${prefix}", to = "${opt_prefix}" }

[[test]]
write = { path = "test.xkb", contents = "xkb_keymap {};" }

[[test]]
run = ["${bin}/xkbcomp", "./test.xkb"]

[[test]]
assert_exists = "test.xkm"
"#;

    #[test]
    fn test_shipped_registry_parses() {
        let text = include_str!("../../registry/xkbcomp.toml");
        let desc = parse_descriptor(text, "registry/xkbcomp.toml").unwrap();

        assert_eq!(desc.id().display_name(), "xkbcomp v1.4.7");
        assert_eq!(desc.dependencies_for(Phase::Build).count(), 8);
        assert_eq!(desc.steps().len(), 5);
        assert_eq!(desc.test().map(|t| t.actions.len()), Some(3));
    }

    #[test]
    fn test_parse_full_descriptor() {
        let desc = parse_descriptor(XKBCOMP, "xkbcomp.toml").unwrap();

        assert_eq!(desc.id().display_name(), "xkbcomp v1.4.7");
        assert_eq!(desc.homepage(), Some("https://www.x.org"));
        assert_eq!(
            desc.license().unwrap().to_string(),
            "HPND AND MIT-open-group"
        );
        assert_eq!(desc.sources().len(), 1);
        assert_eq!(desc.dependencies_for(Phase::Build).count(), 7);
        assert_eq!(desc.run_dependencies().len(), 2);
        assert_eq!(desc.steps().len(), 5);
        assert_eq!(desc.steps()[3], BuildStep::run("make", ["install"]));
        assert!(matches!(desc.steps()[4], BuildStep::Replace { .. }));

        let test = desc.test().unwrap();
        assert_eq!(test.actions.len(), 3);
        assert_eq!(
            test.actions[2],
            TestAction::AssertExists {
                pattern: "test.xkm".into()
            }
        );
    }

    #[test]
    fn test_rejects_unknown_schema() {
        let text = XKBCOMP.replace("schema = 1", "schema = 2");
        let err = parse_descriptor(&text, "x.toml").unwrap_err();
        assert!(matches!(
            err,
            DescriptorError::UnsupportedSchema { found: 2, .. }
        ));
    }

    #[test]
    fn test_rejects_missing_schema() {
        let text = XKBCOMP.replace("schema = 1", "");
        let err = parse_descriptor(&text, "x.toml").unwrap_err();
        assert!(matches!(err, DescriptorError::Invalid { .. }));
    }

    #[test]
    fn test_rejects_bad_checksum() {
        let text = XKBCOMP.replace(
            "23a385b73ae3a69c02f1df3d3b52254e098a535033b28fd80eccccc2c9f1e999",
            "not-a-hash",
        );
        let err = parse_descriptor(&text, "x.toml").unwrap_err();
        assert!(err.to_string().contains("not a sha256"));
    }

    #[test]
    fn test_rejects_step_with_two_kinds() {
        let text = XKBCOMP.replace(
            "run = [\"make\"]\n",
            "run = [\"make\"]\nreplace = { file = \"a\", from = \"b\", to = \"c\" }\n",
        );
        let err = parse_descriptor(&text, "x.toml").unwrap_err();
        assert!(err.to_string().contains("install step 2"));
    }

    #[test]
    fn test_rejects_unknown_field() {
        let text = XKBCOMP.replace("[dependencies]", "[dependencies]\noptional = [\"x\"]");
        assert!(matches!(
            parse_descriptor(&text, "x.toml").unwrap_err(),
            DescriptorError::Parse { .. }
        ));
    }

    #[test]
    fn test_rejects_duplicate_dependency() {
        let text = XKBCOMP.replace(
            "run = [\"libx11\", \"libxkbfile\"]",
            "run = [\"libx11\", \"libx11\"]",
        );
        let err = parse_descriptor(&text, "x.toml").unwrap_err();
        assert!(err.to_string().contains("listed twice"));
    }

    #[test]
    fn test_minimal_descriptor() {
        let text = r#"
schema = 1
[package]
name = "hello"
version = "2.12"
license = "GPL-3.0-or-later"
[[source]]
url = "file:///tmp/hello-2.12.tar.gz"
sha256 = "sha256:2CF24DBA5FB0A30E26E83B2AC5B9E29E1B161E5C1FA7425E73043362938B9824"
"#;
        let desc = parse_descriptor(text, "hello.toml").unwrap();
        assert!(desc.dependencies().is_empty());
        assert!(desc.steps().is_empty());
        assert!(desc.test().is_none());
        assert_eq!(
            desc.sources()[0].sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_load_records_origin() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("xkbcomp.toml");
        std::fs::write(&path, XKBCOMP).unwrap();

        let desc = load_descriptor(&path).unwrap();
        assert_eq!(desc.origin(), Some(path.as_path()));
        assert_eq!(desc.steps().len(), 5);
    }
}
