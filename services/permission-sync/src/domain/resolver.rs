//! 权限解析
//!
//! 纯函数：角色默认权限 + 主体的显式授予/撤销 -> 规范化权限映射

use serde::{Deserialize, Serialize};

use super::permission::{Permission, PermissionMap};
use super::role::{Role, RoleDefaults};

/// 主体级别的显式覆盖
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOverrides {
    #[serde(default)]
    pub grants: Vec<Permission>,
    #[serde(default)]
    pub revokes: Vec<Permission>,
}

impl PermissionOverrides {
    pub fn new(grants: Vec<Permission>, revokes: Vec<Permission>) -> Self {
        Self { grants, revokes }
    }
}

pub struct PermissionResolver;

impl PermissionResolver {
    /// 解析权限映射
    ///
    /// 1. 复制角色默认映射（未知角色：直接返回空映射）
    /// 2. 逐个应用授予（按模块做集合并）
    /// 3. 逐个应用撤销（按模块做集合差）
    ///
    /// 撤销最后应用，因此同时出现在授予和撤销中的权限一定被排除。
    pub fn resolve(
        role_defaults: Option<&PermissionMap>,
        overrides: &PermissionOverrides,
    ) -> PermissionMap {
        let Some(defaults) = role_defaults else {
            return PermissionMap::new();
        };

        let mut resolved = defaults.clone();
        for grant in &overrides.grants {
            resolved.insert(*grant);
        }
        for revoke in &overrides.revokes {
            resolved.remove(*revoke);
        }
        resolved
    }

    /// 从静态角色表查默认映射后解析
    pub fn resolve_for_role(
        table: &RoleDefaults,
        role: &Role,
        overrides: &PermissionOverrides,
    ) -> PermissionMap {
        Self::resolve(table.get(role), overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::permission::{Action, Module};

    fn perm(module: Module, action: Action) -> Permission {
        Permission::new(module, action)
    }

    #[test]
    fn test_role_defaults_without_overrides() {
        let table = RoleDefaults::builtin();
        let map =
            PermissionResolver::resolve_for_role(&table, &Role::Member, &Default::default());
        assert_eq!(&map, table.get(&Role::Member).unwrap());
    }

    #[test]
    fn test_grants_are_unioned() {
        let table = RoleDefaults::builtin();
        let overrides = PermissionOverrides::new(vec![perm(Module::Finance, Action::View)], vec![]);
        let map = PermissionResolver::resolve_for_role(&table, &Role::Member, &overrides);

        assert!(map.allows(Module::Finance, Action::View));
        assert!(map.allows(Module::Events, Action::View));
    }

    #[test]
    fn test_revoke_removes_role_default() {
        let table = RoleDefaults::builtin();
        let overrides = PermissionOverrides::new(vec![], vec![perm(Module::Events, Action::View)]);
        let map = PermissionResolver::resolve_for_role(&table, &Role::Member, &overrides);

        assert!(!map.allows(Module::Events, Action::View));
        assert!(map.actions(Module::Events).is_none());
    }

    #[test]
    fn test_revoke_wins_over_grant() {
        let table = RoleDefaults::builtin();
        let both = perm(Module::Finance, Action::Update);
        let overrides = PermissionOverrides::new(vec![both], vec![both]);

        for role in [Role::Admin, Role::Member, Role::Leader] {
            let map = PermissionResolver::resolve_for_role(&table, &role, &overrides);
            assert!(!map.contains(&both), "{role} still has {both}");
        }
    }

    #[test]
    fn test_unknown_role_fails_closed() {
        let table = RoleDefaults::builtin();
        let overrides = PermissionOverrides::new(vec![perm(Module::Finance, Action::View)], vec![]);
        let map = PermissionResolver::resolve_for_role(
            &table,
            &Role::Custom("ghost".to_string()),
            &overrides,
        );
        assert!(map.is_empty());
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let table = RoleDefaults::builtin();
        let overrides = PermissionOverrides::new(
            vec![
                perm(Module::Reports, Action::Export),
                perm(Module::Finance, Action::View),
                perm(Module::Reports, Action::Export),
            ],
            vec![perm(Module::Assistance, Action::Update)],
        );

        for role in [Role::Admin, Role::Secretary, Role::Leader, Role::Member, Role::Professional] {
            let first = PermissionResolver::resolve_for_role(&table, &role, &overrides);
            let second = PermissionResolver::resolve_for_role(&table, &role, &overrides);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_defaults_are_not_mutated() {
        let table = RoleDefaults::builtin();
        let before = table.get(&Role::Member).cloned();
        let overrides = PermissionOverrides::new(
            vec![perm(Module::Finance, Action::View)],
            vec![perm(Module::Events, Action::View)],
        );
        let _ = PermissionResolver::resolve_for_role(&table, &Role::Member, &overrides);
        assert_eq!(table.get(&Role::Member).cloned(), before);
    }
}
