//! 角色与角色默认权限表

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::permission::{Action, Module, PermissionMap};

/// 角色标签
///
/// 内置角色之外的字符串保留为 `Custom`，其默认权限只能来自存储
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Admin,
    Secretary,
    Leader,
    Member,
    Professional,
    Custom(String),
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Role::Admin => "admin",
            Role::Secretary => "secretary",
            Role::Leader => "leader",
            Role::Member => "member",
            Role::Professional => "professional",
            Role::Custom(name) => name,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn is_secretary(&self) -> bool {
        matches!(self, Role::Secretary)
    }

    pub fn is_leader(&self) -> bool {
        matches!(self, Role::Leader)
    }

    pub fn is_member(&self) -> bool {
        matches!(self, Role::Member)
    }

    pub fn is_professional(&self) -> bool {
        matches!(self, Role::Professional)
    }

    pub fn flags(&self) -> RoleFlags {
        RoleFlags {
            is_admin: self.is_admin(),
            is_secretary: self.is_secretary(),
            is_leader: self.is_leader(),
            is_member: self.is_member(),
            is_professional: self.is_professional(),
        }
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "admin" => Role::Admin,
            "secretary" => Role::Secretary,
            "leader" => Role::Leader,
            "member" => Role::Member,
            "professional" => Role::Professional,
            _ => Role::Custom(value),
        }
    }
}

impl From<&str> for Role {
    fn from(value: &str) -> Self {
        Role::from(value.to_string())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl FromStr for Role {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Role::from(s))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 由角色标签直接推出的布尔标记，不依赖权限映射
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RoleFlags {
    pub is_admin: bool,
    pub is_secretary: bool,
    pub is_leader: bool,
    pub is_member: bool,
    pub is_professional: bool,
}

/// 角色 -> 默认权限映射 的静态表
#[derive(Debug, Clone, Default)]
pub struct RoleDefaults {
    table: HashMap<Role, PermissionMap>,
}

impl RoleDefaults {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置角色的默认权限
    pub fn builtin() -> Self {
        use Action::*;

        let mut defaults = Self::new();
        defaults.set(Role::Admin, PermissionMap::full());
        defaults.set(
            Role::Secretary,
            PermissionMap::new()
                .with(Module::Users, &[View])
                .with(Module::Members, &[View, Create, Update])
                .with(Module::Events, &[View, Create, Update, Delete])
                .with(Module::Finance, &[View])
                .with(Module::Assistance, &[View])
                .with(Module::Notifications, &[View, Create])
                .with(Module::Reports, &[View, Export]),
        );
        defaults.set(
            Role::Leader,
            PermissionMap::new()
                .with(Module::Members, &[View])
                .with(Module::Events, &[View, Create, Update])
                .with(Module::Assistance, &[View, Create, Update])
                .with(Module::Notifications, &[View, Create]),
        );
        defaults.set(
            Role::Member,
            PermissionMap::new()
                .with(Module::Events, &[View])
                .with(Module::Notifications, &[View]),
        );
        defaults.set(
            Role::Professional,
            PermissionMap::new()
                .with(Module::Members, &[View])
                .with(Module::Assistance, &[View, Create, Update])
                .with(Module::Notifications, &[View])
                .with(Module::Reports, &[View]),
        );
        defaults
    }

    pub fn set(&mut self, role: Role, permissions: PermissionMap) {
        self.table.insert(role, permissions);
    }

    pub fn get(&self, role: &Role) -> Option<&PermissionMap> {
        self.table.get(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.table.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_builtin_and_custom_roles() {
        assert_eq!(Role::from("Admin"), Role::Admin);
        assert_eq!(Role::from("member"), Role::Member);
        assert_eq!(
            Role::from("treasurer"),
            Role::Custom("treasurer".to_string())
        );
        assert_eq!(Role::Custom("treasurer".to_string()).to_string(), "treasurer");
    }

    #[test]
    fn test_role_serde_as_plain_string() {
        let json = serde_json::to_string(&Role::Secretary).unwrap();
        assert_eq!(json, "\"secretary\"");
        let role: Role = serde_json::from_str("\"coach\"").unwrap();
        assert_eq!(role, Role::Custom("coach".to_string()));
    }

    #[test]
    fn test_flags_follow_role_tag_only() {
        let flags = Role::Admin.flags();
        assert!(flags.is_admin);
        assert!(!flags.is_member);

        assert_eq!(Role::Custom("x".into()).flags(), RoleFlags::default());
    }

    #[test]
    fn test_builtin_member_defaults() {
        let defaults = RoleDefaults::builtin();
        let member = defaults.get(&Role::Member).unwrap();
        assert!(member.allows(Module::Events, Action::View));
        assert!(!member.allows(Module::Finance, Action::Manage));
        assert!(defaults.get(&Role::Custom("coach".into())).is_none());
    }
}
