//! Runs test blocks in a scratch directory.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use crate::builder::env::Environment;
use crate::builder::expand::Placeholders;
use crate::core::{PackageDescriptor, TestAction};
use crate::util::cancel::CancelToken;
use crate::util::fs::glob_files;
use crate::util::process::{CommandSpec, ProcessRunner};
use crate::verify::{ActionOutcome, VerificationResult};

pub struct Verifier {
    runner: Arc<dyn ProcessRunner>,
}

impl Verifier {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Verifier { runner }
    }

    /// Run the test block of `descriptor` against its installed keg.
    ///
    /// A descriptor without a test block passes with no outcomes.
    pub fn verify(
        &self,
        descriptor: &PackageDescriptor,
        env: &Environment,
        cancel: &CancelToken,
    ) -> VerificationResult {
        let package = descriptor.id();
        let actions = descriptor
            .test()
            .map(|block| block.actions.as_slice())
            .unwrap_or(&[]);

        if actions.is_empty() {
            return VerificationResult {
                package,
                passed: true,
                outcomes: Vec::new(),
            };
        }

        let scratch = match tempfile::Builder::new()
            .prefix(&format!("cellar-test-{}-", package.name()))
            .tempdir()
        {
            Ok(dir) => dir,
            Err(e) => {
                return VerificationResult {
                    package,
                    passed: false,
                    outcomes: vec![ActionOutcome {
                        index: 0,
                        action: "create scratch directory".to_string(),
                        passed: false,
                        detail: Some(e.to_string()),
                    }],
                }
            }
        };

        let mut placeholders = env.placeholders();
        placeholders.set("testpath", scratch.path().display().to_string());

        let mut outcomes = Vec::with_capacity(actions.len());
        for (index, action) in actions.iter().enumerate() {
            let result = self.run_action(action, &scratch, env, &placeholders, cancel);
            let passed = result.is_ok();
            tracing::debug!(
                "{}: test action {} `{}` {}",
                package,
                index + 1,
                action.describe(),
                if passed { "passed" } else { "failed" }
            );
            outcomes.push(ActionOutcome {
                index,
                action: action.describe(),
                passed,
                detail: result.err(),
            });
            if !passed {
                break;
            }
        }

        VerificationResult {
            package,
            passed: outcomes.iter().all(|o| o.passed),
            outcomes,
        }
    }

    fn run_action(
        &self,
        action: &TestAction,
        scratch: &TempDir,
        env: &Environment,
        placeholders: &Placeholders,
        cancel: &CancelToken,
    ) -> Result<(), String> {
        let base = scratch.path();

        match action {
            TestAction::Write { path, contents } => {
                let path = base.join(placeholders.expand(path));
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                fs::write(&path, placeholders.expand(contents)).map_err(|e| e.to_string())
            }

            TestAction::Run { command, args } => {
                let spec = CommandSpec::new(placeholders.expand(command), base)
                    .args(placeholders.expand_args(args))
                    .envs(&env.vars())
                    .env("HOME", base.display().to_string());
                let output = self.runner.run(&spec, cancel).map_err(|e| e.to_string())?;
                if output.success() {
                    return Ok(());
                }
                let status = match output.exit_code {
                    Some(code) => format!("exited with code {}", code),
                    None => "terminated by a signal".to_string(),
                };
                Err(format!("{}\n{}", status, output.combined()))
            }

            TestAction::AssertExists { pattern } => {
                let pattern = placeholders.expand(pattern);
                let matches = glob_files(base, std::slice::from_ref(&pattern))
                    .map_err(|e| format!("{:#}", e))?;
                if matches.is_empty() && !base.join(&pattern).is_dir() {
                    return Err(format!("nothing matches `{}`", pattern));
                }
                Ok(())
            }

            TestAction::AssertContains { path, text } => {
                let path = base.join(placeholders.expand(path));
                let text = placeholders.expand(text);
                let contents = read_lossy(&path)?;
                if contents.contains(&text) {
                    Ok(())
                } else {
                    Err(format!("`{}` not found in {}", text, path.display()))
                }
            }
        }
    }
}

fn read_lossy(path: &Path) -> Result<String, String> {
    fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|e| format!("{}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Layout;
    use crate::test_support::{CommandExpectation, CommandPattern, FakeOutput, FakeRunner};
    use crate::test_support::fixtures::{source_for, xkbcomp_descriptor};

    fn setup() -> (tempfile::TempDir, Environment, PackageDescriptor) {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = Layout::new(tmp.path().join("root"));
        let desc = xkbcomp_descriptor(source_for("https://example.org/x.zip", b"x"));
        let env = Environment::new(&layout, desc.id());
        (tmp, env, desc)
    }

    #[test]
    fn test_passing_block() {
        let (_tmp, env, desc) = setup();
        let runner = FakeRunner::new();
        // The fake compiler writes its output into the scratch directory.
        runner.expect_pattern(
            CommandExpectation::new(
                CommandPattern::Contains("xkbcomp ./test.xkb".into()),
                FakeOutput::success(""),
            )
            .with_effect(|spec| {
                std::fs::write(spec.cwd.join("test.xkm"), "compiled").unwrap();
            }),
        );

        let result =
            Verifier::new(Arc::new(runner.clone())).verify(&desc, &env, &CancelToken::new());

        assert!(result.passed, "{:?}", result);
        assert_eq!(result.outcomes.len(), 3);
        let call = &runner.calls()[0];
        assert!(call.ends_with("/cellar/xkbcomp/1.4.7/bin/xkbcomp ./test.xkb"));
    }

    #[test]
    fn test_stops_at_first_failure() {
        let (_tmp, env, desc) = setup();
        let runner = FakeRunner::new();
        runner.expect_prefix("/", FakeOutput::failure(1, "syntax error"));

        let result = Verifier::new(Arc::new(runner)).verify(&desc, &env, &CancelToken::new());

        assert!(!result.passed);
        assert_eq!(result.outcomes.len(), 2);
        let failed = result.failed_action().unwrap();
        assert_eq!(failed.index, 1);
        assert!(failed.detail.as_deref().unwrap().contains("syntax error"));
    }

    #[test]
    fn test_assert_exists_fails_without_output() {
        let (_tmp, env, desc) = setup();
        let result =
            Verifier::new(Arc::new(FakeRunner::new())).verify(&desc, &env, &CancelToken::new());

        assert!(!result.passed);
        assert_eq!(result.failed_action().unwrap().index, 2);
    }

    #[test]
    fn test_assert_contains_and_testpath() {
        let (_tmp, env, _) = setup();
        let desc = PackageDescriptor::builder("greet", "1.0")
            .test_action(TestAction::Write {
                path: "hello.txt".into(),
                contents: "dir=${testpath}\n".into(),
            })
            .test_action(TestAction::AssertContains {
                path: "${testpath}/hello.txt".into(),
                text: "dir=/".into(),
            })
            .build();

        let result =
            Verifier::new(Arc::new(FakeRunner::new())).verify(&desc, &env, &CancelToken::new());
        assert!(result.passed, "{:?}", result);
    }

    #[test]
    fn test_no_test_block() {
        let (_tmp, env, _) = setup();
        let desc = PackageDescriptor::builder("plain", "1.0").build();
        let result =
            Verifier::new(Arc::new(FakeRunner::new())).verify(&desc, &env, &CancelToken::new());
        assert!(result.passed);
        assert!(result.is_empty());
    }
}
