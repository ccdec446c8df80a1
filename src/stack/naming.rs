//! Resource naming
//!
//! Every physical name in the stack goes through [`Namer::name_resource`] so
//! two deployments with different demo names never collide in one account
//! and region.

/// Fixed project prefix, first component of every name
pub const PROJECT_PREFIX: &str = "demo";

/// Delimiter used when the caller has no stronger constraint
pub const DEFAULT_DELIMITER: &str = "-";

/// How widely a resource name must be unique
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// Unique within the account and region (catalog entries, queries)
    #[default]
    Account,
    /// Unique across the whole provider namespace (buckets, IAM roles)
    Global,
}

impl From<bool> for Scope {
    fn from(is_global_resource: bool) -> Self {
        if is_global_resource {
            Self::Global
        } else {
            Self::Account
        }
    }
}

/// Naming inputs of one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namer {
    demo_name: String,
    account: String,
    region: String,
}

impl Namer {
    pub fn new(demo_name: &str, account: &str, region: &str) -> Self {
        Self {
            demo_name: demo_name.to_string(),
            account: account.to_string(),
            region: region.to_string(),
        }
    }

    /// Build `demo<d>logical[<d>account<d>region]<d>demo_name`.
    ///
    /// Empty components are left out. The result is not lowercased; targets
    /// that need lowercase names must lowercase it themselves.
    pub fn name_resource(&self, logical_name: &str, scope: Scope, delimiter: &str) -> String {
        let (account, region) = match scope {
            Scope::Global => (Some(self.account.as_str()), Some(self.region.as_str())),
            Scope::Account => (None, None),
        };

        [
            Some(PROJECT_PREFIX),
            Some(logical_name),
            account,
            region,
            Some(self.demo_name.as_str()),
        ]
        .into_iter()
        .flatten()
        .filter(|component| !component.is_empty())
        .collect::<Vec<_>>()
        .join(delimiter)
    }

    /// Account-scoped name with the default delimiter
    pub fn name(&self, logical_name: &str) -> String {
        self.name_resource(logical_name, Scope::Account, DEFAULT_DELIMITER)
    }

    /// Globally-unique name with the default delimiter
    pub fn global_name(&self, logical_name: &str) -> String {
        self.name_resource(logical_name, Scope::Global, DEFAULT_DELIMITER)
    }

    /// Account-scoped name joined with `_`, for Glue and Athena identifiers
    pub fn snake_name(&self, logical_name: &str) -> String {
        self.name_resource(logical_name, Scope::Account, "_")
    }

    pub fn demo_name(&self) -> &str {
        &self.demo_name
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namer() -> Namer {
        Namer::new("workshop", "111122223333", "eu-central-1")
    }

    #[test]
    fn test_global_name() {
        assert_eq!(
            namer().name_resource("raw-data-bucket", Scope::Global, "-"),
            "demo-raw-data-bucket-111122223333-eu-central-1-workshop"
        );
    }

    #[test]
    fn test_account_scoped_name() {
        assert_eq!(
            namer().name("crawler-without-classifier"),
            "demo-crawler-without-classifier-workshop"
        );
        assert_eq!(
            namer().snake_name("athena_workgroup"),
            "demo_athena_workgroup_workshop"
        );
    }

    #[test]
    fn test_empty_components_are_omitted() {
        let namer = Namer::new("", "111122223333", "");
        assert_eq!(
            namer.name_resource("glue-role", Scope::Global, "-"),
            "demo-glue-role-111122223333"
        );
    }

    #[test]
    fn test_scope_from_bool() {
        assert_eq!(Scope::from(true), Scope::Global);
        assert_eq!(Scope::from(false), Scope::Account);
    }

    #[test]
    fn test_caller_lowercases() {
        let namer = Namer::new("Workshop", "111122223333", "eu-central-1");
        let name = namer.snake_name("database_raw");
        assert_eq!(name, "demo_database_raw_Workshop");
        assert_eq!(name.to_lowercase(), "demo_database_raw_workshop");
    }
}
