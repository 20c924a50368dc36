//! Participant value types.
//!
//! A participant is a (role, person, optional institution) triple scoped to
//! one cruise. The collection behaves like an ordered set keyed on
//! (role, person): inserting a duplicate folds the two entries together,
//! adopting a non-empty institution if one side lacked it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One (role, person, institution) triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub role: String,
    pub person_id: Uuid,
    pub institution_id: Option<Uuid>,
}

impl Participant {
    pub fn new(role: impl Into<String>, person_id: Uuid) -> Self {
        Participant {
            role: role.into(),
            person_id,
            institution_id: None,
        }
    }

    pub fn with_institution(mut self, institution_id: Uuid) -> Self {
        self.institution_id = Some(institution_id);
        self
    }
}

/// Order-preserving, (role, person)-deduplicated participant collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Participants(Vec<Participant>);

impl Participants {
    pub fn new() -> Self {
        Participants::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Participant> {
        self.0.iter()
    }

    /// Insert a participant, folding with an existing (role, person) entry.
    /// Returns true if a new entry was appended.
    pub fn insert(&mut self, participant: Participant) -> bool {
        if let Some(existing) = self
            .0
            .iter_mut()
            .find(|p| p.role == participant.role && p.person_id == participant.person_id)
        {
            if existing.institution_id.is_none() {
                existing.institution_id = participant.institution_id;
            }
            return false;
        }
        self.0.push(participant);
        true
    }

    /// Remove every entry matching (role, person). Returns true if any
    /// entry was removed.
    pub fn remove(&mut self, role: &str, person_id: Uuid) -> bool {
        let before = self.0.len();
        self.0.retain(|p| !(p.role == role && p.person_id == person_id));
        self.0.len() != before
    }

    /// Rewrite person and institution references during a merge.
    pub(crate) fn repoint(&mut self, from: Uuid, to: Uuid) -> bool {
        let mut touched = false;
        for p in &mut self.0 {
            if p.person_id == from {
                p.person_id = to;
                touched = true;
            }
            if p.institution_id == Some(from) {
                p.institution_id = Some(to);
                touched = true;
            }
        }
        touched
    }
}

impl FromIterator<Participant> for Participants {
    fn from_iter<I: IntoIterator<Item = Participant>>(iter: I) -> Self {
        let mut out = Participants::new();
        for p in iter {
            out.insert(p);
        }
        out
    }
}

impl<'a> IntoIterator for &'a Participants {
    type Item = &'a Participant;
    type IntoIter = std::slice::Iter<'a, Participant>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
