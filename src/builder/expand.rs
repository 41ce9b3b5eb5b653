//! `${name}` placeholder expansion for step and test arguments.

use std::collections::BTreeMap;

/// Argument that expands to the standard configure flags.
pub const STD_CONFIGURE_ARGS: &str = "${std_configure_args}";

/// Values available to `${name}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placeholders {
    values: BTreeMap<String, String>,
    std_configure_args: Vec<String>,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn set_std_configure_args(&mut self, args: Vec<String>) -> &mut Self {
        self.std_configure_args = args;
        self
    }

    /// Expand every known placeholder in `template`. Unknown names and
    /// unterminated `${` are left untouched, so shell variables such as
    /// `${HOME}` in a `sh -c` script pass through.
    pub fn expand(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            match after.find('}') {
                Some(end) => {
                    let name = &after[..end];
                    match self.values.get(name) {
                        Some(value) => out.push_str(value),
                        None => {
                            out.push_str("${");
                            out.push_str(name);
                            out.push('}');
                        }
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }

        out.push_str(rest);
        out
    }

    /// Expand a list of arguments. An argument that is exactly
    /// `${std_configure_args}` is replaced by the configure flag list.
    pub fn expand_args(&self, args: &[String]) -> Vec<String> {
        let mut out = Vec::with_capacity(args.len());
        for arg in args {
            if arg == STD_CONFIGURE_ARGS {
                out.extend(self.std_configure_args.iter().cloned());
            } else {
                out.push(self.expand(arg));
            }
        }
        out
    }
}
