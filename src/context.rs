//! Operation context (spec.md §6 "Context object"): frozen, never mutated,
//! carried through the kernel into permission checks and generation
//! freshness validation.

use nexus_rebac::{Entity, Subject, ZoneId};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationContext {
    subject_type: String,
    subject_id: String,
    groups: Vec<String>,
    zone_id: ZoneId,
    is_admin: bool,
    agent_generation: Option<u64>,
}

impl OperationContext {
    pub fn new(subject_type: impl Into<String>, subject_id: impl Into<String>, zone_id: ZoneId) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            groups: Vec::new(),
            zone_id,
            is_admin: false,
            agent_generation: None,
        }
    }

    pub fn with_groups(mut self, groups: Vec<String>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn with_agent_generation(mut self, generation: u64) -> Self {
        self.agent_generation = Some(generation);
        self
    }

    pub fn subject_type(&self) -> &str {
        &self.subject_type
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn zone_id(&self) -> &ZoneId {
        &self.zone_id
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn agent_generation(&self) -> Option<u64> {
        self.agent_generation
    }

    pub fn subject(&self) -> Subject {
        Subject::new(Entity::new(self.subject_type.clone(), self.subject_id.clone()))
    }

    /// Stable identity used as the generation-tracker key (spec.md §6,
    /// supplemented stale-session detection).
    pub fn subject_key(&self) -> String {
        format!("{}:{}", self.subject_type, self.subject_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_methods_compose() {
        let ctx = OperationContext::new("user", "alice", ZoneId::from("root"))
            .with_groups(vec!["eng".to_owned()])
            .with_admin(true)
            .with_agent_generation(3);
        assert_eq!(ctx.subject_key(), "user:alice");
        assert!(ctx.is_admin());
        assert_eq!(ctx.agent_generation(), Some(3));
        assert_eq!(ctx.groups(), &["eng".to_owned()]);
    }
}
