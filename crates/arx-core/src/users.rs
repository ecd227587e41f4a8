//! User and group management for the RBAC surface.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use arx_rbac::Rbac;
use arx_store::Store;
use arx_types::{
    Action, ArxError, FieldViolation, Group, Permission, RequestContext, Resource, Result, User,
};

use crate::validate;

/// Argon2id with default parameters; the PHC string embeds the salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| ArxError::internal("password hashing failed"))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[derive(Clone)]
pub struct UserService {
    store: Store,
    rbac: Rbac,
}

impl UserService {
    pub fn new(store: Store, rbac: Rbac) -> Self {
        Self { store, rbac }
    }

    pub fn create_user(
        &self,
        ctx: &RequestContext,
        username: &str,
        email: Option<&str>,
        password: &str,
    ) -> Result<User> {
        self.rbac
            .require(ctx, Permission::new(Resource::Users, Action::Write), None)?;

        let mut violations: Vec<FieldViolation> = Vec::new();
        validate::check_name("username", username, &mut violations);
        if password.len() < 8 {
            violations.push(FieldViolation::new(
                "password",
                "must be at least 8 characters",
            ));
        }
        validate::finish(violations)?;

        let password_hash = hash_password(password)?;
        self.store.create_user(ctx, username, email, &password_hash)
    }

    pub fn get_user(&self, ctx: &RequestContext, id: i64) -> Result<User> {
        let principal = ctx.require_principal()?;
        if principal.user_id != id {
            self.rbac
                .require(ctx, Permission::new(Resource::Users, Action::Read), None)?;
        }
        self.store.get_user(ctx, id)
    }

    pub fn list_users(&self, ctx: &RequestContext) -> Result<Vec<User>> {
        self.rbac
            .require(ctx, Permission::new(Resource::Users, Action::Read), None)?;
        self.store.list_users(ctx)
    }

    pub fn update_user(
        &self,
        ctx: &RequestContext,
        id: i64,
        email: Option<&str>,
        password: Option<&str>,
    ) -> Result<User> {
        let principal = ctx.require_principal()?;
        if principal.user_id != id {
            self.rbac
                .require(ctx, Permission::new(Resource::Users, Action::Write), None)?;
        }

        let password_hash = match password {
            Some(password) => {
                if password.len() < 8 {
                    return Err(ArxError::invalid_fields(
                        "validation failed",
                        vec![FieldViolation::new(
                            "password",
                            "must be at least 8 characters",
                        )],
                    ));
                }
                Some(hash_password(password)?)
            }
            None => None,
        };
        self.store
            .update_user(ctx, id, email, password_hash.as_deref())
    }

    pub fn delete_user(&self, ctx: &RequestContext, id: i64) -> Result<()> {
        self.rbac
            .require(ctx, Permission::new(Resource::Users, Action::Delete), None)?;
        let principal = ctx.require_principal()?;
        if principal.user_id == id {
            return Err(ArxError::invalid_argument("cannot delete yourself"));
        }
        self.store.delete_user(ctx, id)
    }

    pub fn create_group(&self, ctx: &RequestContext, name: &str, description: &str) -> Result<Group> {
        self.rbac
            .require(ctx, Permission::new(Resource::Users, Action::Write), None)?;
        let mut violations: Vec<FieldViolation> = Vec::new();
        validate::check_name("name", name, &mut violations);
        validate::finish(violations)?;
        self.store.create_group(ctx, name, description)
    }

    pub fn add_member(&self, ctx: &RequestContext, user_id: i64, group_id: i64) -> Result<()> {
        self.rbac
            .require(ctx, Permission::new(Resource::Users, Action::Write), None)?;
        self.store.get_user(ctx, user_id)?;
        self.store.get_group(ctx, group_id)?;
        self.store.add_member(ctx, user_id, group_id)
    }

    pub fn remove_member(&self, ctx: &RequestContext, user_id: i64, group_id: i64) -> Result<()> {
        self.rbac
            .require(ctx, Permission::new(Resource::Users, Action::Write), None)?;
        self.store.remove_member(ctx, user_id, group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
        assert!(!verify_password("anything", "not a phc string"));
    }
}
