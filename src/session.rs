use ulid::Ulid;

use crate::model::Role;

/// Who is asking. Resolved once per statement and passed explicitly into every
/// engine mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Session {
    /// The operator login configured by `CAREBOOK_ADMIN_USER`.
    Admin,
    User { id: Ulid, role: Role },
}

impl Session {
    pub fn client(id: Ulid) -> Self {
        Session::User { id, role: Role::Client }
    }

    pub fn counselor(id: Ulid) -> Self {
        Session::User { id, role: Role::Counselor }
    }

    pub fn user_id(&self) -> Option<Ulid> {
        match self {
            Session::Admin => None,
            Session::User { id, .. } => Some(*id),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Session::Admin)
    }

    /// True for the admin and for the counselor `counselor_id` themselves.
    pub fn manages(&self, counselor_id: Ulid) -> bool {
        match self {
            Session::Admin => true,
            Session::User { id, role: Role::Counselor } => *id == counselor_id,
            Session::User { .. } => false,
        }
    }

    /// True for the admin, the counselor, and the booking user.
    pub fn can_see_appointment(&self, counselor_id: Ulid, user_id: Ulid) -> bool {
        self.manages(counselor_id) || self.user_id() == Some(user_id)
    }
}
