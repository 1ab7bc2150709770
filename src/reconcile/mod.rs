//! Keyed add/remove diffs for set-valued sub-resources.
//!
//! Members of a set are identified by a caller supplied key. Members are
//! immutable once created: the same key with different content is an error,
//! never an in-place update.

use std::collections::HashMap;
use std::future::Future;

use thiserror::Error;

/// Errors raised while diffing two sets.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SetDiffError {
    /// A member kept its key but changed other fields.
    #[error("member '{key}' cannot be modified in place; remove it and add a new one")]
    ImmutableMember {
        /// Key of the modified member.
        key: String,
    },
    /// The same key appears twice within one set.
    #[error("member '{key}' appears more than once")]
    DuplicateKey {
        /// Repeated key.
        key: String,
    },
    /// Some, but not all, members of an all-or-nothing group were removed.
    #[error("partial deletion of {group} is not allowed; remove either all {group} or none")]
    PartialDeletion {
        /// Human readable group name, for example `custom_zone_mappings`.
        group: String,
    },
}

/// Members to remove and to add, in input order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SetDelta<M> {
    /// Members present only in the old set.
    pub to_remove: Vec<M>,
    /// Members present only in the new set.
    pub to_add: Vec<M>,
}

impl<M> Default for SetDelta<M> {
    fn default() -> Self {
        Self {
            to_remove: Vec::new(),
            to_add: Vec::new(),
        }
    }
}

impl<M> SetDelta<M> {
    /// Returns `true` when neither side has work.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }

    /// Applies the delta: every removal completes before any addition starts.
    ///
    /// # Errors
    ///
    /// Returns the first error from `remove` or `add`; later calls are not
    /// made.
    pub async fn apply<E, R, RFut, A, AFut>(&self, mut remove: R, mut add: A) -> Result<(), E>
    where
        R: FnMut(&M) -> RFut,
        RFut: Future<Output = Result<(), E>>,
        A: FnMut(&M) -> AFut,
        AFut: Future<Output = Result<(), E>>,
    {
        for member in &self.to_remove {
            remove(member).await?;
        }
        for member in &self.to_add {
            add(member).await?;
        }
        Ok(())
    }
}

/// Outcome of an all-or-nothing diff.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AllOrNothingDelta<M> {
    /// Nothing to do.
    Unchanged,
    /// Remove every member with one delete-all call.
    RemoveAll,
    /// Add the listed members; nothing is removed.
    Add(Vec<M>),
}

/// Computes the keyed difference between `old` and `new`.
///
/// # Errors
///
/// Returns [`SetDiffError::ImmutableMember`] when a key is shared but the
/// members differ, and [`SetDiffError::DuplicateKey`] when a key repeats
/// within one set.
pub fn diff_keyed<M, K, F>(
    old: &[M],
    new: &[M],
    mut key_fn: F,
) -> Result<SetDelta<M>, SetDiffError>
where
    M: Clone + PartialEq,
    K: Into<String>,
    F: FnMut(&M) -> K,
{
    let old_index = index_by_key(old, &mut key_fn)?;
    let new_index = index_by_key(new, &mut key_fn)?;

    for (key, new_member) in &new_index {
        if old_index
            .get(key)
            .is_some_and(|old_member| *old_member != *new_member)
        {
            return Err(SetDiffError::ImmutableMember { key: key.clone() });
        }
    }

    let mut missing_from = |index: &HashMap<String, &M>, member: &M| {
        let key: String = key_fn(member).into();
        !index.contains_key(&key)
    };
    let to_remove = old
        .iter()
        .filter(|member| missing_from(&new_index, *member))
        .cloned()
        .collect();
    let to_add = new
        .iter()
        .filter(|member| missing_from(&old_index, *member))
        .cloned()
        .collect();

    Ok(SetDelta { to_remove, to_add })
}

/// Computes the difference for a group that may only be removed as a whole.
///
/// # Errors
///
/// Returns the errors of [`diff_keyed`], plus
/// [`SetDiffError::PartialDeletion`] when members are removed while others
/// remain.
pub fn diff_all_or_nothing<M, K, F>(
    group: &str,
    old: &[M],
    new: &[M],
    key_fn: F,
) -> Result<AllOrNothingDelta<M>, SetDiffError>
where
    M: Clone + PartialEq,
    K: Into<String>,
    F: FnMut(&M) -> K,
{
    let delta = diff_keyed(old, new, key_fn)?;
    if !delta.to_remove.is_empty() {
        if !new.is_empty() {
            return Err(SetDiffError::PartialDeletion {
                group: group.to_owned(),
            });
        }
        return Ok(AllOrNothingDelta::RemoveAll);
    }
    if delta.to_add.is_empty() {
        Ok(AllOrNothingDelta::Unchanged)
    } else {
        Ok(AllOrNothingDelta::Add(delta.to_add))
    }
}

fn index_by_key<'a, M, K, F>(
    members: &'a [M],
    key_fn: &mut F,
) -> Result<HashMap<String, &'a M>, SetDiffError>
where
    K: Into<String>,
    F: FnMut(&M) -> K,
{
    let mut index = HashMap::with_capacity(members.len());
    for member in members {
        let key = key_fn(member).into();
        if index.contains_key(&key) {
            return Err(SetDiffError::DuplicateKey { key });
        }
        index.insert(key, member);
    }
    Ok(index)
}

#[cfg(test)]
mod tests;
