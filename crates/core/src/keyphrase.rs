//! Key phrases and diverse key-phrase selection (§4.8.1).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A scored key phrase extracted from a chunk or aggregated across a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPhrase {
  pub text: String,
  pub score: f64,
}

impl KeyPhrase {
  pub fn new(text: impl Into<String>, score: f64) -> Self {
    Self { text: text.into(), score }
  }
}

/// Select up to `k` diverse key phrases from a multiset of (phrase, score)
/// observations.
///
/// Aggregates frequency across all occurrences, sorts by frequency
/// descending (ties broken by first occurrence order), then greedily picks
/// phrases whose whitespace-tokenized words don't overlap any
/// already-selected phrase's words. The no-overlap rule is relaxed once
/// fewer than 2 phrases remain to choose and no disjoint candidate exists,
/// so that sparse inputs still return close to `k` results.
pub fn select_diverse(phrases: &[KeyPhrase], k: usize) -> Vec<KeyPhrase> {
  if k == 0 || phrases.is_empty() {
    return Vec::new();
  }

  // Aggregate by text: frequency (count of occurrences) and first-seen order.
  struct Agg {
    text: String,
    count: usize,
    first_seen: usize,
    best_score: f64,
  }

  let mut order: Vec<String> = Vec::new();
  let mut agg: HashMap<String, Agg> = HashMap::new();

  for (i, p) in phrases.iter().enumerate() {
    agg
      .entry(p.text.clone())
      .and_modify(|a| {
        a.count += 1;
        if p.score > a.best_score {
          a.best_score = p.score;
        }
      })
      .or_insert_with(|| {
        order.push(p.text.clone());
        Agg {
          text: p.text.clone(),
          count: 1,
          first_seen: i,
          best_score: p.score,
        }
      });
  }

  let mut candidates: Vec<&Agg> = agg.values().collect();
  candidates.sort_by(|a, b| b.count.cmp(&a.count).then(a.first_seen.cmp(&b.first_seen)));

  let words_of = |s: &str| -> Vec<String> { s.split_whitespace().map(|w| w.to_lowercase()).collect() };

  let mut selected: Vec<KeyPhrase> = Vec::new();
  let mut used_words: std::collections::HashSet<String> = std::collections::HashSet::new();

  for cand in &candidates {
    if selected.len() >= k {
      break;
    }
    let cand_words = words_of(&cand.text);
    let overlaps = cand_words.iter().any(|w| used_words.contains(w));
    if !overlaps || selected.len() < 2 {
      if overlaps && selected.len() >= 2 {
        continue;
      }
      selected.push(KeyPhrase::new(cand.text.clone(), cand.best_score));
      used_words.extend(cand_words);
    }
  }

  // If the relaxed pass under 2 still left room and skipped overlapping
  // candidates entirely, fall back to filling remaining slots by frequency
  // order regardless of overlap.
  if selected.len() < k.min(candidates.len()) {
    for cand in &candidates {
      if selected.len() >= k {
        break;
      }
      if selected.iter().any(|s| s.text == cand.text) {
        continue;
      }
      selected.push(KeyPhrase::new(cand.text.clone(), cand.best_score));
    }
  }

  selected
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_select_diverse_frequency_order() {
    let phrases = vec![
      KeyPhrase::new("alpha", 0.5),
      KeyPhrase::new("beta", 0.5),
      KeyPhrase::new("beta", 0.5),
      KeyPhrase::new("gamma", 0.5),
      KeyPhrase::new("gamma", 0.5),
      KeyPhrase::new("delta", 0.5),
    ];
    let selected = select_diverse(&phrases, 4);
    let texts: Vec<&str> = selected.iter().map(|p| p.text.as_str()).collect();
    // beta and gamma tie at count 2; beta occurs first so it ranks first among the tie.
    assert_eq!(texts, vec!["beta", "gamma", "alpha", "delta"]);
  }

  #[test]
  fn test_select_diverse_avoids_word_overlap() {
    let phrases = vec![
      KeyPhrase::new("machine learning", 0.9),
      KeyPhrase::new("machine learning", 0.9),
      KeyPhrase::new("learning rate", 0.8),
      KeyPhrase::new("neural networks", 0.7),
    ];
    let selected = select_diverse(&phrases, 2);
    let texts: Vec<&str> = selected.iter().map(|p| p.text.as_str()).collect();
    // "learning rate" shares "learning" with "machine learning" and is skipped
    // in favor of the disjoint "neural networks".
    assert_eq!(texts, vec!["machine learning", "neural networks"]);
  }

  #[test]
  fn test_select_diverse_relaxes_below_two() {
    let phrases = vec![KeyPhrase::new("only phrase", 1.0)];
    let selected = select_diverse(&phrases, 5);
    assert_eq!(selected.len(), 1);
  }

  #[test]
  fn test_select_diverse_empty() {
    assert!(select_diverse(&[], 5).is_empty());
  }
}
