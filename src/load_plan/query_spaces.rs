//! The relational skeleton built alongside the return graph.
//!
//! One query space is registered per fetch source reached through a join:
//! the root, each join-fetched entity or collection, and each composite.
//! Join edges record the columns and outer-ness the downstream SQL stage
//! needs to render the from-clause. Uids are small per-walk counters; all
//! traversal state is per-walk, so there is no global counter to reset.

use serde::Serialize;

use crate::walker::errors::WalkingError;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuerySpaces {
    spaces: Vec<QuerySpace>,
    #[serde(skip)]
    uid_counter: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySpace {
    pub uid: String,
    pub kind: QuerySpaceKind,
    pub joins: Vec<Join>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum QuerySpaceKind {
    Entity { entity_name: String, table: String },
    Collection { role: String, table: String },
    Composite { name: String },
}

/// A join edge from the owning space to `rhs_uid`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Join {
    pub rhs_uid: String,
    pub lhs_columns: Vec<String>,
    pub rhs_columns: Vec<String>,
    pub left_outer: bool,
}

impl QuerySpaces {
    pub fn new() -> Self {
        Self::default()
    }

    fn generate_uid(&mut self) -> String {
        self.uid_counter += 1;
        format!("uid{}", self.uid_counter)
    }

    pub fn make_entity_space(&mut self, entity_name: &str, table: &str) -> String {
        self.make_space(QuerySpaceKind::Entity {
            entity_name: entity_name.to_string(),
            table: table.to_string(),
        })
    }

    pub fn make_collection_space(&mut self, role: &str, table: &str) -> String {
        self.make_space(QuerySpaceKind::Collection {
            role: role.to_string(),
            table: table.to_string(),
        })
    }

    pub fn make_composite_space(&mut self, name: &str) -> String {
        self.make_space(QuerySpaceKind::Composite {
            name: name.to_string(),
        })
    }

    fn make_space(&mut self, kind: QuerySpaceKind) -> String {
        let uid = self.generate_uid();
        log::trace!("Registering query space {} : {:?}", uid, kind);
        self.spaces.push(QuerySpace {
            uid: uid.clone(),
            kind,
            joins: Vec::new(),
        });
        uid
    }

    pub fn add_join(
        &mut self,
        lhs_uid: &str,
        rhs_uid: String,
        lhs_columns: Vec<String>,
        rhs_columns: Vec<String>,
        left_outer: bool,
    ) -> Result<(), WalkingError> {
        let space = self
            .spaces
            .iter_mut()
            .find(|s| s.uid == lhs_uid)
            .ok_or_else(|| WalkingError::UnexpectedStackState {
                message: format!("no query space registered for uid `{}`", lhs_uid),
            })?;
        space.joins.push(Join {
            rhs_uid,
            lhs_columns,
            rhs_columns,
            left_outer,
        });
        Ok(())
    }

    pub fn space(&self, uid: &str) -> Option<&QuerySpace> {
        self.spaces.iter().find(|s| s.uid == uid)
    }

    pub fn spaces(&self) -> &[QuerySpace] {
        &self.spaces
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}
