use serde::{Deserialize, Serialize};

/// Role of a profile within the platform.
///
/// Roles form a fixed, totally ordered hierarchy. The ordering lives in a single
/// rank table ([`rank`]); nothing else in the workspace compares roles, and the
/// enum deliberately does not derive `PartialOrd`.
///
/// Unrecognized role strings deserialize to [`Role::Unknown`], which ranks below
/// every real role, so malformed data never grants access.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// Platform operations staff, outside tenant billing.
    SuperAdmin,
    CompanyOwner,
    CompanyAdmin,
    ProjectManager,
    Supervisor,
    FieldWorker,
    Unknown,
}

impl Role {
    /// Every recognized role, highest privilege first.
    pub const HIERARCHY: [Role; 6] = [
        Role::SuperAdmin,
        Role::CompanyOwner,
        Role::CompanyAdmin,
        Role::ProjectManager,
        Role::Supervisor,
        Role::FieldWorker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::CompanyOwner => "company_owner",
            Role::CompanyAdmin => "company_admin",
            Role::ProjectManager => "project_manager",
            Role::Supervisor => "supervisor",
            Role::FieldWorker => "field_worker",
            Role::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "super_admin" => Role::SuperAdmin,
            "company_owner" => Role::CompanyOwner,
            "company_admin" => Role::CompanyAdmin,
            "project_manager" => Role::ProjectManager,
            "supervisor" => Role::Supervisor,
            "field_worker" => Role::FieldWorker,
            _ => Role::Unknown,
        }
    }

    /// Position in the hierarchy (see [`rank`]).
    pub fn rank(&self) -> u8 {
        rank(*self)
    }

    /// Whether this role is at least as privileged as `required`.
    pub fn at_least(&self, required: Role) -> bool {
        at_least(*self, required)
    }

    /// The top tier: bypasses tenant scoping and subscription checks.
    pub fn is_platform_operator(&self) -> bool {
        matches!(self, Role::SuperAdmin)
    }
}

/// Numeric rank of a role. Higher is more privileged; unknown roles rank 0.
pub fn rank(role: Role) -> u8 {
    match role {
        Role::SuperAdmin => 6,
        Role::CompanyOwner => 5,
        Role::CompanyAdmin => 4,
        Role::ProjectManager => 3,
        Role::Supervisor => 2,
        Role::FieldWorker => 1,
        Role::Unknown => 0,
    }
}

/// `rank(actual) >= rank(required)`.
pub fn at_least(actual: Role, required: Role) -> bool {
    rank(actual) >= rank(required)
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Role::parse(&value)
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::parse(value)
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
