//! Terminal implementation of the `DecisionProvider` capability.
//!
//! All human-in-the-loop presentation lives here; the resolution state
//! machines only ever see the trait. Tests use `ScriptedProvider`.

use std::io::{self, Write};

use crate::models::{AggregatedIdentity, MatchCandidate, TargetItem};
use crate::resolver::{CountSide, DecisionProvider, DuplicateChoice};

/// Interactive prompts on stdin/stdout.
#[derive(Default)]
pub struct TerminalPrompt;

impl TerminalPrompt {
    pub fn new() -> Self {
        Self
    }

    fn read_line(&self) -> String {
        let mut line = String::new();
        if io::stdin().read_line(&mut line).is_err() {
            return String::new();
        }
        line.trim().to_string()
    }
}

impl DecisionProvider for TerminalPrompt {
    fn choose_match(
        &mut self,
        target: &TargetItem,
        candidates: &[MatchCandidate],
    ) -> Option<usize> {
        println!("\nFuzzy match found for:");
        println!("   Library: {} - {}", target.artist, target.title);
        println!("\n   Potential matches in play history:");
        for (idx, candidate) in candidates.iter().enumerate() {
            let loved = if candidate.loved { " [loved]" } else { "" };
            println!(
                "   [{}] {} - {} ({} plays{}) (similarity: {:.0}%)",
                idx + 1,
                candidate.artist,
                candidate.title,
                candidate.play_count,
                loved,
                candidate.combined_score
            );
        }
        println!("   [0] None of these match (skip this track)");

        loop {
            print!("\n   -> Select match [0-{}]: ", candidates.len());
            let _ = io::stdout().flush();
            let choice = self.read_line();
            if choice == "0" {
                return None;
            }
            if let Ok(idx) = choice.parse::<usize>() {
                if (1..=candidates.len()).contains(&idx) {
                    let selected = &candidates[idx - 1];
                    println!("   Matched to: {} - {}", selected.artist, selected.title);
                    return Some(idx - 1);
                }
            }
            println!(
                "   Invalid choice. Please enter a number between 0 and {}",
                candidates.len()
            );
        }
    }

    fn choose_duplicate(
        &mut self,
        identity: &AggregatedIdentity,
        items: &[&TargetItem],
    ) -> DuplicateChoice {
        println!(
            "\nDuplicate versions for: {} - {} ({} plays)",
            identity.artist,
            identity.title,
            identity.play_count()
        );
        for (idx, item) in items.iter().enumerate() {
            println!(
                "   [{}] album: {}",
                idx + 1,
                item.album.as_deref().unwrap_or("(none)")
            );
        }
        println!("   [a] all versions get the full count");
        println!("   [d] divide the count by album evidence");
        println!("   [s] skip this group");

        loop {
            print!("\n   -> Select version [1-{}/a/d/s]: ", items.len());
            let _ = io::stdout().flush();
            match self.read_line().to_lowercase().as_str() {
                "a" => return DuplicateChoice::All,
                "d" => return DuplicateChoice::Divide,
                "s" => return DuplicateChoice::Skip,
                choice => {
                    if let Ok(idx) = choice.parse::<usize>() {
                        if (1..=items.len()).contains(&idx) {
                            return DuplicateChoice::Single(idx - 1);
                        }
                    }
                    println!("   Invalid choice.");
                }
            }
        }
    }

    fn choose_count(
        &mut self,
        artist: &str,
        title: &str,
        target_count: u32,
        source_count: u32,
    ) -> CountSide {
        println!("\n{} - {}", artist, title);
        println!("   Library: {} | History: {}", target_count, source_count);
        print!("   -> Library playcount is higher. Keep library (L) or use history (H)? [L/H, default=L]: ");
        let _ = io::stdout().flush();
        match self.read_line().to_lowercase().as_str() {
            "h" => CountSide::Source,
            _ => CountSide::Local,
        }
    }
}

// ============================================================================
// Scripted provider for tests
// ============================================================================

/// Deterministic `DecisionProvider` fed with pre-scripted answers, counting
/// every prompt it receives. Panics when asked for a decision it has no
/// script for, which makes unexpected prompting a test failure.
#[cfg(test)]
#[derive(Default)]
pub struct ScriptedProvider {
    match_choices: Vec<Option<usize>>,
    duplicate_choices: Vec<DuplicateChoice>,
    count_choices: Vec<CountSide>,
    match_prompts: usize,
    duplicate_prompts: usize,
}

#[cfg(test)]
impl ScriptedProvider {
    pub fn with_match_choices(mut self, choices: Vec<Option<usize>>) -> Self {
        self.match_choices = choices;
        self.match_choices.reverse();
        self
    }

    pub fn with_duplicate_choices(mut self, choices: Vec<DuplicateChoice>) -> Self {
        self.duplicate_choices = choices;
        self.duplicate_choices.reverse();
        self
    }

    pub fn with_count_choices(mut self, choices: Vec<CountSide>) -> Self {
        self.count_choices = choices;
        self.count_choices.reverse();
        self
    }

    pub fn match_prompts(&self) -> usize {
        self.match_prompts
    }

    pub fn duplicate_prompts(&self) -> usize {
        self.duplicate_prompts
    }
}

#[cfg(test)]
impl DecisionProvider for ScriptedProvider {
    fn choose_match(&mut self, _target: &TargetItem, _candidates: &[MatchCandidate]) -> Option<usize> {
        self.match_prompts += 1;
        self.match_choices
            .pop()
            .expect("unexpected fuzzy-match prompt in test")
    }

    fn choose_duplicate(
        &mut self,
        _identity: &AggregatedIdentity,
        _items: &[&TargetItem],
    ) -> DuplicateChoice {
        self.duplicate_prompts += 1;
        self.duplicate_choices
            .pop()
            .expect("unexpected duplicate prompt in test")
    }

    fn choose_count(
        &mut self,
        _artist: &str,
        _title: &str,
        _target_count: u32,
        _source_count: u32,
    ) -> CountSide {
        self.count_choices
            .pop()
            .expect("unexpected conflict prompt in test")
    }
}
