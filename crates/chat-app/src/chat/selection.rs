use tidechat_protocol::ChatAnswer;

/// Panels that can be opened beside an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalysisTab {
    ThoughtProcess,
    SupportingContent,
    Citation,
}

/// Which answer, panel and citation the reader is looking at.
///
/// Independent of the turn lifecycle: streaming never touches it, and
/// clearing it never affects a turn in flight.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectionState {
    active_citation: Option<String>,
    active_tab: Option<AnalysisTab>,
    selected_answer: usize,
}

impl SelectionState {
    pub fn active_citation(&self) -> Option<&str> {
        self.active_citation.as_deref()
    }

    pub fn active_tab(&self) -> Option<AnalysisTab> {
        self.active_tab
    }

    pub fn selected_answer(&self) -> usize {
        self.selected_answer
    }

    pub fn is_panel_open(&self) -> bool {
        self.active_tab.is_some()
    }

    /// Clicking the open citation of the same answer again closes the panel.
    pub fn show_citation(&mut self, citation: impl Into<String>, answer_index: usize) {
        let citation = citation.into();
        let same_citation = self.active_citation.as_deref() == Some(citation.as_str());
        if same_citation
            && self.active_tab == Some(AnalysisTab::Citation)
            && self.selected_answer == answer_index
        {
            self.active_tab = None;
        } else {
            self.active_citation = Some(citation);
            self.active_tab = Some(AnalysisTab::Citation);
        }

        self.selected_answer = answer_index;
    }

    pub fn toggle_tab(&mut self, tab: AnalysisTab, answer_index: usize) {
        if self.active_tab == Some(tab) && self.selected_answer == answer_index {
            self.active_tab = None;
        } else {
            self.active_tab = Some(tab);
        }

        self.selected_answer = answer_index;
    }

    pub fn tab_available(&self, tab: AnalysisTab, answer: &ChatAnswer) -> bool {
        match tab {
            AnalysisTab::ThoughtProcess => answer.context.thoughts().is_some(),
            AnalysisTab::SupportingContent => answer.context.data_points().is_some(),
            AnalysisTab::Citation => self.active_citation.is_some(),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
