//! Access control for privileged risk-engine operations.
//!
//! One permission table shared by every contract in the stack. The admin
//! principal (governance/timelock) holds blanket permission; anyone else
//! must be granted a specific action signature.

use odra::prelude::*;

use super::errors::RiskError;
use super::events::PermissionUpdated;

/// Access Control Manager contract
#[odra::module]
pub struct AccessControlManager {
    /// Admin principal with blanket permission
    admin: Var<Address>,
    /// (account, action signature) -> allowed
    permissions: Mapping<(Address, String), bool>,
}

#[odra::module]
impl AccessControlManager {
    /// Initialize with the admin principal
    pub fn init(&mut self, admin: Address) {
        self.admin.set(admin);
    }

    /// Grant an account permission to call an action
    pub fn grant_permission(&mut self, account: Address, action: String) {
        self.only_admin();
        if self.permissions.get(&(account, action.clone())).unwrap_or(false) {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.permissions.set(&(account, action.clone()), true);
        self.env().emit_event(PermissionUpdated {
            account,
            action,
            allowed: true,
        });
    }

    /// Revoke a previously granted permission
    pub fn revoke_permission(&mut self, account: Address, action: String) {
        self.only_admin();
        if !self.permissions.get(&(account, action.clone())).unwrap_or(false) {
            self.env().revert(RiskError::UnchangedValue);
        }
        self.permissions.set(&(account, action.clone()), false);
        self.env().emit_event(PermissionUpdated {
            account,
            action,
            allowed: false,
        });
    }

    /// Whether `caller` may invoke `action`
    pub fn is_allowed_to_call(&self, caller: Address, action: String) -> bool {
        if let Some(admin) = self.admin.get() {
            if caller == admin {
                return true;
            }
        }
        self.permissions.get(&(caller, action)).unwrap_or(false)
    }

    /// Current admin principal
    pub fn get_admin(&self) -> Address {
        self.admin.get_or_revert_with(RiskError::AccessDenied)
    }

    /// Hand the admin role to a new principal
    pub fn set_admin(&mut self, new_admin: Address) {
        self.only_admin();
        self.admin.set(new_admin);
    }

    fn only_admin(&self) {
        let caller = self.env().caller();
        let admin = self.admin.get_or_revert_with(RiskError::AccessDenied);
        if caller != admin {
            self.env().revert(RiskError::AccessDenied);
        }
    }
}
