//! Question ordering for a new session.
//!
//! Questions are split into a required group and an optional group, each group
//! is shuffled independently, and the required group is placed first. The
//! result is computed once per session and persisted; it is never recomputed
//! for a resumed session.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::model::{Question, QuestionId};

/// Ordered question ids plus the size of the leading required block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionOrder {
    pub ids: Vec<QuestionId>,
    pub required_count: usize,
}

impl QuestionOrder {
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    #[must_use]
    pub fn optional_count(&self) -> usize {
        self.ids.len().saturating_sub(self.required_count)
    }
}

/// Sequence questions with the given random source.
///
/// `SliceRandom::shuffle` is an unbiased Fisher-Yates shuffle, applied to each
/// group separately so no optional question can ever precede a required one.
pub fn sequence_with_rng<R: Rng + ?Sized>(questions: &[Question], rng: &mut R) -> QuestionOrder {
    let (mut required, mut optional): (Vec<QuestionId>, Vec<QuestionId>) = (Vec::new(), Vec::new());
    for question in questions {
        if question.is_required() {
            required.push(question.id.clone());
        } else {
            optional.push(question.id.clone());
        }
    }

    required.shuffle(rng);
    optional.shuffle(rng);

    let required_count = required.len();
    required.extend(optional);

    QuestionOrder {
        ids: required,
        required_count,
    }
}

/// Sequence questions, deterministically when a seed is given.
#[must_use]
pub fn sequence(questions: &[Question], seed: Option<u64>) -> QuestionOrder {
    match seed {
        Some(seed) => sequence_with_rng(questions, &mut StdRng::seed_from_u64(seed)),
        None => sequence_with_rng(questions, &mut rand::rng()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Alignment;
    use std::collections::HashSet;

    fn questions(required: usize, optional: usize, unset: usize) -> Vec<Question> {
        let mut out = Vec::new();
        for i in 0..required {
            out.push(Question::new(format!("r{i}"), "R", "c", Alignment::Left, Some(true)));
        }
        for i in 0..optional {
            out.push(Question::new(format!("o{i}"), "O", "c", Alignment::Right, Some(false)));
        }
        for i in 0..unset {
            out.push(Question::new(format!("u{i}"), "U", "c", Alignment::Right, None));
        }
        out
    }

    #[test]
    fn empty_input_yields_empty_order() {
        let order = sequence(&[], Some(1));
        assert!(order.is_empty());
        assert_eq!(order.required_count, 0);
    }

    #[test]
    fn order_is_a_permutation_with_required_first() {
        let qs = questions(6, 4, 3);
        for seed in 0..64 {
            let order = sequence(&qs, Some(seed));

            let expected: HashSet<_> = qs.iter().map(|q| q.id.clone()).collect();
            let actual: HashSet<_> = order.ids.iter().cloned().collect();
            assert_eq!(order.len(), qs.len());
            assert_eq!(actual, expected);

            assert_eq!(order.required_count, 6);
            assert!(order.ids[..6].iter().all(|id| id.as_str().starts_with('r')));
            assert!(order.ids[6..].iter().all(|id| !id.as_str().starts_with('r')));
        }
    }

    #[test]
    fn same_seed_is_deterministic() {
        let qs = questions(5, 5, 0);
        assert_eq!(sequence(&qs, Some(42)), sequence(&qs, Some(42)));
    }

    #[test]
    fn different_seeds_eventually_reorder() {
        let qs = questions(8, 0, 0);
        let first = sequence(&qs, Some(0));
        assert!((1..32).any(|seed| sequence(&qs, Some(seed)) != first));
    }

    #[test]
    fn unset_required_lands_in_optional_group() {
        let qs = questions(1, 0, 2);
        let order = sequence(&qs, None);
        assert_eq!(order.required_count, 1);
        assert_eq!(order.ids[0], QuestionId::new("r0"));
        assert_eq!(order.optional_count(), 2);
    }
}
