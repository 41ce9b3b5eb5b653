//! Test fixtures: descriptors and in-memory archives.

use std::io::{Cursor, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use url::Url;

use crate::core::{BuildStep, LicenseExpr, PackageDescriptor, SourceRef, TestAction};
use crate::util::hash::sha256_bytes;

/// Build a gzip-compressed tarball from `(path, contents)` pairs.
pub fn tar_gz_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .expect("append tar entry");
    }

    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}

/// Build a zip archive from `(path, contents)` pairs.
pub fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o644);

    for (path, contents) in files {
        writer.start_file(*path, options).expect("start zip entry");
        writer
            .write_all(contents.as_bytes())
            .expect("write zip entry");
    }

    writer.finish().expect("finish zip").into_inner()
}

/// A source served at `url` whose checksum matches `body`.
pub fn source_for(url: &str, body: &[u8]) -> SourceRef {
    SourceRef::new(Url::parse(url).expect("valid url"), sha256_bytes(body))
}

/// The xkbcomp descriptor, as shipped in the default registry.
pub fn xkbcomp_descriptor(source: SourceRef) -> PackageDescriptor {
    PackageDescriptor::builder("xkbcomp", "1.4.7")
        .description("XKB keyboard description compiler")
        .homepage("https://www.x.org")
        .license(LicenseExpr::AllOf(vec![
            "HPND".to_string(),
            "MIT-open-group".to_string(),
        ]))
        .source(source)
        .build_dep("pkgconf")
        .build_dep("autoconf")
        .run_dep("libx11")
        .run_dep("libxkbfile")
        .step(BuildStep::run("autoreconf", ["--force", "--install"]))
        .step(BuildStep::run(
            "./configure",
            [
                "--with-xkb-config-root=${root}/share/X11/xkb",
                "${std_configure_args}",
            ],
        ))
        .step(BuildStep::run("make", Vec::<String>::new()))
        .step(BuildStep::run("make", ["install"]))
        .step(BuildStep::Replace {
            file: "${lib}/pkgconfig/xkbcomp.pc".into(),
            from: "${prefix}".into(),
            to: "${opt_prefix}".into(),
        })
        .test_action(TestAction::Write {
            path: "test.xkb".into(),
            contents: "xkb_keymap {};\n".into(),
        })
        .test_action(TestAction::Run {
            command: "${bin}/xkbcomp".into(),
            args: vec!["./test.xkb".into()],
        })
        .test_action(TestAction::AssertExists {
            pattern: "test.xkm".into(),
        })
        .build()
}

/// A leaf descriptor with `steps` and the given run dependencies.
pub fn simple_descriptor(
    name: &str,
    source: SourceRef,
    run_deps: &[&str],
    steps: Vec<BuildStep>,
) -> PackageDescriptor {
    let mut builder = PackageDescriptor::builder(name, "1.0.0").source(source);
    for dep in run_deps {
        builder = builder.run_dep(*dep);
    }
    for step in steps {
        builder = builder.step(step);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archives_are_non_empty() {
        let tgz = tar_gz_bytes(&[("a/b.txt", "hello")]);
        assert_eq!(&tgz[..2], &[0x1f, 0x8b]);

        let zip = zip_bytes(&[("a/b.txt", "hello")]);
        assert_eq!(&zip[..4], b"PK\x03\x04");
    }

    #[test]
    fn test_xkbcomp_descriptor_shape() {
        let desc = xkbcomp_descriptor(source_for("https://example.org/x.zip", b"x"));
        assert_eq!(desc.steps().len(), 5);
        assert_eq!(desc.run_dependencies().len(), 2);
        assert_eq!(desc.test().unwrap().actions.len(), 3);
    }
}
