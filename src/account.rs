//! Portal account registry, read at the workflow boundary

use crate::utils;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    #[n(0)]
    Administrator,
    #[n(1)]
    Staff,
    #[n(2)]
    PurokLeader,
    #[n(3)]
    Resident,
}

impl Role {
    /// Roles whose holders receive the new-request fan-out and may act on
    /// the processing queue.
    pub fn can_process_requests(&self) -> bool {
        matches!(self, Role::Administrator | Role::Staff)
    }
}

/// One portal user. The workflow only ever reads these; the surrounding
/// portal owns registration and role assignment.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    #[n(0)]
    pub id: String, // bech32-encoded uuid7
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub email: String,
    #[n(3)]
    pub address: String,
    #[n(4)]
    pub purok: String,
    #[n(5)]
    pub role: Role,
    #[n(6)]
    pub is_active: bool,
}

impl UserAccount {
    pub fn new(name: &str, email: &str, role: Role) -> anyhow::Result<Self> {
        Ok(Self {
            id: utils::new_uuid_to_bech32("user")?,
            name: name.to_owned(),
            email: email.to_owned(),
            address: String::new(),
            purok: String::new(),
            role,
            is_active: true,
        })
    }

    pub fn with_address(mut self, address: &str, purok: &str) -> Self {
        self.address = address.to_owned();
        self.purok = purok.to_owned();
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }
}
