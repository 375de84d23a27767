use serde::{Deserialize, Serialize};

use crate::ids::ActorId;

string_enum! {
    /// Row-level authorization role of the signed-in user.
    pub enum Role {
        Admin => "admin",
        Member => "member",
        Viewer => "viewer",
    }
}

/// The signed-in user on whose behalf mutations are issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(name: impl Into<String>, role: Role) -> Self {
        Self {
            id: ActorId::new(),
            name: name.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn can_write(&self) -> bool {
        self.role != Role::Viewer
    }
}
