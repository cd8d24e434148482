//! Last-known identity and attribute snapshots.
//!
//! Hosts call `identify`/`group` freely, often on every render. The store
//! merges each call into its snapshot and reports whether anything actually
//! changed, so only real changes are sent to the gateway.

use waypoint_core::attributes::{merge_attributes, Attributes};
use waypoint_core::protocol::{UpsertCompanyData, UpsertUserData};

#[derive(Debug, Clone, PartialEq, Default)]
struct Identity {
    id: String,
    attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributeStore {
    user: Option<Identity>,
    company: Option<Identity>,
    membership: Attributes,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn company_id(&self) -> Option<&str> {
        self.company.as_ref().map(|c| c.id.as_str())
    }

    pub fn user_attributes(&self) -> Option<&Attributes> {
        self.user.as_ref().map(|u| &u.attributes)
    }

    /// Record the identified user. Switching to another user replaces the
    /// snapshot and forgets the company. Returns `true` when something
    /// changed.
    pub fn set_user(&mut self, external_user_id: &str, attributes: &Attributes) -> bool {
        match &mut self.user {
            Some(user) if user.id == external_user_id => {
                match merge_attributes(&user.attributes, attributes) {
                    Some(merged) => {
                        user.attributes = merged;
                        true
                    }
                    None => false,
                }
            }
            _ => {
                self.user = Some(Identity {
                    id: external_user_id.to_string(),
                    attributes: attributes.clone(),
                });
                self.company = None;
                self.membership = Attributes::new();
                true
            }
        }
    }

    /// Record the user's company and membership attributes.
    pub fn set_company(
        &mut self,
        external_company_id: &str,
        attributes: &Attributes,
        membership: &Attributes,
    ) -> bool {
        let company_changed = match &mut self.company {
            Some(company) if company.id == external_company_id => {
                match merge_attributes(&company.attributes, attributes) {
                    Some(merged) => {
                        company.attributes = merged;
                        true
                    }
                    None => false,
                }
            }
            _ => {
                self.company = Some(Identity {
                    id: external_company_id.to_string(),
                    attributes: attributes.clone(),
                });
                self.membership = Attributes::new();
                true
            }
        };
        let membership_changed = match merge_attributes(&self.membership, membership) {
            Some(merged) => {
                self.membership = merged;
                true
            }
            None => false,
        };
        company_changed || membership_changed
    }

    /// Forget everything, e.g. on logout.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The full user snapshot as an upsert, for the connect handshake.
    pub fn user_upsert(&self) -> Option<UpsertUserData> {
        self.user.as_ref().map(|u| UpsertUserData {
            external_user_id: u.id.clone(),
            attributes: u.attributes.clone(),
        })
    }

    pub fn company_upsert(&self) -> Option<UpsertCompanyData> {
        self.company.as_ref().map(|c| UpsertCompanyData {
            external_company_id: c.id.clone(),
            attributes: c.attributes.clone(),
            membership_attributes: self.membership.clone(),
        })
    }
}
