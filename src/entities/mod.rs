pub mod minterm;
pub mod minterm_mapping;
pub mod permission;
pub mod permission_mapping;
pub mod resource;
pub mod role;
pub mod role_inheritance;

pub use minterm::Entity as Minterm;
pub use minterm_mapping::Entity as MintermMapping;
pub use permission::Entity as Permission;
pub use permission_mapping::Entity as PermissionMapping;
pub use resource::Entity as Resource;
pub use role::Entity as Role;
pub use role_inheritance::Entity as RoleInheritance;
