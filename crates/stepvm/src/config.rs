use serde::{Deserialize, Serialize};
use stepvm_cpu::WriteRule;
use stepvm_mem::DEFAULT_STACK_BASE;

/// Virtual machine construction options.
///
/// Every field has a default, so a config file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Used to name the execution thread (`stepvm-<name>`).
    pub name: String,
    /// Start of the implicit `.stack` segment. `RSP` and `RBP` start here.
    pub stack_base: u64,
    pub write_rule: WriteRule,
    /// Caps the number of instructions one non-step run may execute.
    pub run_limit: Option<u64>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            name: "vm".to_owned(),
            stack_base: DEFAULT_STACK_BASE,
            write_rule: WriteRule::Architectural,
            run_limit: None,
        }
    }
}

impl VmConfig {
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_stack_base(mut self, stack_base: u64) -> Self {
        self.stack_base = stack_base;
        self
    }

    #[must_use]
    pub fn with_write_rule(mut self, write_rule: WriteRule) -> Self {
        self.write_rule = write_rule;
        self
    }

    #[must_use]
    pub fn with_run_limit(mut self, run_limit: Option<u64>) -> Self {
        self.run_limit = run_limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: VmConfig =
            serde_json::from_str(r#"{ "write_rule": "preserve_upper", "run_limit": 500 }"#)
                .unwrap();
        assert_eq!(config.write_rule, WriteRule::PreserveUpper);
        assert_eq!(config.run_limit, Some(500));
        assert_eq!(config.stack_base, DEFAULT_STACK_BASE);
        assert_eq!(config.name, "vm");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<VmConfig>(r#"{ "stack": 1 }"#).is_err());
    }

    #[test]
    fn builders_override_fields() {
        let config = VmConfig::default()
            .with_name("fib")
            .with_stack_base(0x1000)
            .with_run_limit(Some(10));
        assert_eq!(config.name, "fib");
        assert_eq!(config.stack_base, 0x1000);
        assert_eq!(config.run_limit, Some(10));
        assert_eq!(config.write_rule, WriteRule::Architectural);
    }
}
