//! The pipeline kanban: tracked evaluations grouped by status.
//!
//! The board is built client-side from the evaluations list. Only
//! evaluations the user has saved (`user_saved` is set) appear on it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::QueryError;
use crate::api::{Evaluation, EvaluationList, EvaluationPatch, GovAiApi, OpportunityFilters};

/// Most evaluations fetched to build the board.
pub const BOARD_LIMIT: u32 = 500;

/// Where the user has placed an opportunity in their bid pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStatus {
    Watching,
    Bidding,
    Submitted,
    Won,
    Lost,
    #[serde(other)]
    Unknown,
}

impl PipelineStatus {
    /// Board columns, left to right.
    pub const COLUMNS: [Self; 5] = [
        Self::Watching,
        Self::Bidding,
        Self::Submitted,
        Self::Won,
        Self::Lost,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Watching => "WATCHING",
            Self::Bidding => "BIDDING",
            Self::Submitted => "SUBMITTED",
            Self::Won => "WON",
            Self::Lost => "LOST",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// `true` once the outcome is known.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Won | Self::Lost)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Saved evaluations by pipeline column.
///
/// Statuses the client does not know are kept in an `Unknown` column rather
/// than dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineBoard {
    columns: BTreeMap<PipelineStatus, Vec<Evaluation>>,
}

impl PipelineBoard {
    /// Groups the saved evaluations, keeping their order within each column.
    pub fn from_evaluations(evaluations: impl IntoIterator<Item = Evaluation>) -> Self {
        let mut board = Self::default();
        for evaluation in evaluations {
            board.insert(evaluation);
        }
        board
    }

    /// Cards in `status`, in board order.
    #[must_use]
    pub fn column(&self, status: PipelineStatus) -> &[Evaluation] {
        self.columns.get(&status).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Non-empty columns, left to right.
    pub fn columns(&self) -> impl Iterator<Item = (PipelineStatus, &[Evaluation])> {
        self.columns
            .iter()
            .map(|(status, cards)| (*status, cards.as_slice()))
    }

    /// Total number of cards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Finds a card and its column.
    #[must_use]
    pub fn find(&self, id: &str) -> Option<(PipelineStatus, &Evaluation)> {
        self.columns.iter().find_map(|(status, cards)| {
            cards.iter().find(|e| e.id == id).map(|e| (*status, e))
        })
    }

    /// Moves a card to the end of `status`. Returns `false` if it is not on the board.
    pub fn move_to(&mut self, id: &str, status: PipelineStatus) -> bool {
        let Some(mut card) = self.take(id) else {
            return false;
        };
        card.user_saved = Some(status);
        self.columns.entry(status).or_default().push(card);
        true
    }

    /// Applies a user edit to a card, moving it if the status changed.
    ///
    /// Returns `false` if the card is not on the board.
    pub fn apply(&mut self, id: &str, patch: &EvaluationPatch) -> bool {
        let Some(current) = self.find(id).map(|(status, _)| status) else {
            return false;
        };
        if let Some(cards) = self.columns.get_mut(&current)
            && let Some(card) = cards.iter_mut().find(|e| e.id == id)
        {
            patch.apply_to(card);
        }
        match patch.user_saved {
            Some(status) if status != current => self.move_to(id, status),
            _ => true,
        }
    }

    /// Replaces a card with the server's copy of the evaluation.
    ///
    /// The card keeps its position when its status is unchanged, moves when
    /// it changed, and leaves the board when the evaluation is no longer saved.
    pub fn upsert(&mut self, evaluation: Evaluation) {
        if let Some(cards) = self
            .columns
            .values_mut()
            .find(|cards| cards.iter().any(|e| e.id == evaluation.id))
            && let Some(slot) = cards.iter_mut().find(|e| e.id == evaluation.id)
            && slot.user_saved == evaluation.user_saved
        {
            *slot = evaluation;
            return;
        }
        self.take(&evaluation.id);
        self.insert(evaluation);
    }

    fn insert(&mut self, evaluation: Evaluation) {
        if let Some(status) = evaluation.user_saved {
            self.columns.entry(status).or_default().push(evaluation);
        }
    }

    fn take(&mut self, id: &str) -> Option<Evaluation> {
        let (status, index) = self.columns.iter().find_map(|(status, cards)| {
            cards.iter().position(|e| e.id == id).map(|index| (*status, index))
        })?;
        let cards = self.columns.get_mut(&status)?;
        let card = cards.remove(index);
        if cards.is_empty() {
            self.columns.remove(&status);
        }
        Some(card)
    }
}

impl From<EvaluationList> for PipelineBoard {
    fn from(list: EvaluationList) -> Self {
        Self::from_evaluations(list.evaluations)
    }
}

impl GovAiApi {
    /// Builds the pipeline board from one `GET /opportunities` call.
    ///
    /// # Errors
    ///
    /// Propagates transport and decoding errors.
    pub async fn pipeline_board(&self) -> Result<PipelineBoard, QueryError> {
        let filters = OpportunityFilters::new().limit(BOARD_LIMIT);
        self.list_opportunities(&filters).await.map(PipelineBoard::from)
    }
}
