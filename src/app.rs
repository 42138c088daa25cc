//! View-controller state for the TUI: the status word, the record store,
//! the multi-selection set, modal overlays, and the operations key
//! handlers invoke on them.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use ratatui::widgets::TableState;
use tokio::sync::mpsc::UnboundedSender;

use crate::persist;
use crate::record::{Codec, Record};
use crate::replay::{self, ReplayHooks};
use crate::store::{AppendOutcome, RecordStore};

/// Stop auto-scrolling the brief view to the newest record.
pub const FROZEN: u64 = 1 << 0;
/// Detail pane focused.
pub const DETAIL: u64 = 1 << 1;
/// Suspend accepting new records (dropped silently).
pub const STOP: u64 = 1 << 2;
/// Multi-select mode.
pub const MULTI: u64 = 1 << 3;

/// Width of the leading sequence column (hex digits plus padding).
pub const SEQ_COLUMN_WIDTH: u16 = 4;

/// One brief-view column the embedding application defines.
#[derive(Debug, Clone)]
pub struct BriefColumn {
    pub title: String,
    pub max_width: u16,
}

impl BriefColumn {
    pub fn new(title: impl Into<String>, max_width: u16) -> Self {
        Self {
            title: title.into(),
            max_width,
        }
    }
}

/// What a confirm modal does on OK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAction {
    Quit,
    Clear,
}

/// What a form modal does with its input on OK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormAction {
    Save,
    Load,
    Replay,
}

/// Overlay currently on top of the main grid.
#[derive(Debug)]
pub enum Modal {
    None,
    Confirm { text: String, action: ConfirmAction },
    Form {
        title: String,
        label: String,
        input: String,
        action: FormAction,
    },
    Help,
}

pub struct App {
    pub running: bool,
    pub store: RecordStore,
    pub codec: Arc<dyn Codec>,
    pub hooks: Arc<dyn ReplayHooks>,
    pub columns: Vec<BriefColumn>,

    pub status: u64,
    /// 1-based rows selected in multi mode.
    pub multis: BTreeSet<usize>,
    pub prompt: String,
    pub modal: Modal,

    pub table_state: TableState,
    pub detail_text: String,
    pub detail_scroll: u16,
    /// Brief rows visible in the last draw; drives page up/down.
    pub page_rows: usize,

    notice_tx: UnboundedSender<String>,
}

impl App {
    pub fn new(
        capacity: usize,
        codec: Arc<dyn Codec>,
        hooks: Arc<dyn ReplayHooks>,
        columns: Vec<BriefColumn>,
        notice_tx: UnboundedSender<String>,
    ) -> Self {
        let argv: Vec<String> = std::env::args().collect();
        Self {
            running: true,
            store: RecordStore::new(capacity),
            codec,
            hooks,
            columns,
            status: 0,
            multis: BTreeSet::new(),
            prompt: argv.join(" "),
            modal: Modal::None,
            table_state: TableState::default(),
            detail_text: String::new(),
            detail_scroll: 0,
            page_rows: 10,
            notice_tx,
        }
    }

    pub fn is_set(&self, bit: u64) -> bool {
        self.status & bit != 0
    }

    pub fn toggle(&mut self, bit: u64) {
        self.status ^= bit;
    }

    pub fn prompt(&mut self, text: impl Into<String>) {
        self.prompt = text.into();
    }

    /// Total width of the brief table: seq column plus each configured
    /// column with its separator.
    pub fn brief_width(&self) -> u16 {
        let mut width = SEQ_COLUMN_WIDTH + 2;
        for column in &self.columns {
            width += 1 + column.max_width;
        }
        width
    }

    /// Currently highlighted brief row, 1-based.
    pub fn current_row(&self) -> Option<usize> {
        self.table_state.selected().map(|i| i + 1)
    }

    // ------------------------------------------------------------------
    // record intake

    /// Entry point for records arriving off the capture channel.
    pub fn on_record(&mut self, record: Arc<Record>) {
        if self.is_set(STOP) {
            return;
        }

        match self.store.append(record) {
            AppendOutcome::Evicted { dropped, .. } => {
                // rows were renumbered; stale selections would point at the
                // wrong records
                self.multis.clear();
                self.prompt(format!("{} records removed", dropped));
            }
            AppendOutcome::Appended { .. } => {}
        }

        if !self.is_set(FROZEN) && !self.is_set(DETAIL) {
            self.table_state.select(Some(self.store.len() - 1));
        }
    }

    // ------------------------------------------------------------------
    // brief/detail navigation

    pub fn enter_detail(&mut self) {
        let Some(row) = self.current_row() else {
            return;
        };
        let Some(entry) = self.store.get(row) else {
            return;
        };
        self.detail_text = self.codec.detail(&entry.record);
        self.detail_scroll = 0;
        self.status |= DETAIL;
    }

    pub fn leave_detail(&mut self) {
        self.detail_text.clear();
        self.detail_scroll = 0;
        self.status &= !DETAIL;
    }

    pub fn move_selection(&mut self, delta: isize) {
        let len = self.store.len();
        if len == 0 {
            return;
        }
        let current = self.table_state.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, len as isize - 1);
        self.table_state.select(Some(next as usize));
    }

    pub fn select_first(&mut self) {
        if !self.store.is_empty() {
            self.table_state.select(Some(0));
        }
    }

    pub fn select_last(&mut self) {
        let len = self.store.len();
        if len > 0 {
            self.table_state.select(Some(len - 1));
        }
    }

    // ------------------------------------------------------------------
    // multi-select operations (no-ops outside multi mode)

    pub fn toggle_multi_mode(&mut self) {
        self.multis.clear();
        self.toggle(MULTI);
    }

    pub fn toggle_row_selection(&mut self) {
        if !self.is_set(MULTI) {
            return;
        }
        let Some(row) = self.current_row() else {
            return;
        };
        if self.store.get(row).is_none() {
            return;
        }
        if !self.multis.remove(&row) {
            self.multis.insert(row);
        }
    }

    pub fn invert_selection(&mut self) {
        if !self.is_set(MULTI) {
            return;
        }
        let all: BTreeSet<usize> = (1..=self.store.len()).collect();
        self.multis = all.difference(&self.multis).copied().collect();
    }

    /// Select everything, or clear if everything is already selected.
    pub fn select_all_or_none(&mut self) {
        if !self.is_set(MULTI) {
            return;
        }
        if self.multis.len() == self.store.len() {
            self.multis.clear();
        } else {
            self.multis = (1..=self.store.len()).collect();
        }
    }

    pub fn clear_selection(&mut self) {
        if !self.is_set(MULTI) {
            return;
        }
        self.multis.clear();
    }

    /// Records selected in multi mode, ascending by sequence.
    pub fn selected_records(&self) -> Vec<Arc<Record>> {
        self.store.select(self.multis.iter())
    }

    // ------------------------------------------------------------------
    // modal-triggering operations

    pub fn confirm(&mut self, text: impl Into<String>, action: ConfirmAction) {
        self.modal = Modal::Confirm {
            text: text.into(),
            action,
        };
    }

    pub fn request_quit(&mut self) {
        self.confirm("Quit?", ConfirmAction::Quit);
    }

    pub fn request_clear(&mut self) {
        if self.store.is_empty() {
            return;
        }
        self.confirm("Clear all?", ConfirmAction::Clear);
    }

    pub fn request_save(&mut self) {
        let is_multi = self.is_set(MULTI);
        let count = if is_multi {
            self.multis.len()
        } else {
            self.store.len()
        };
        if count == 0 {
            self.prompt("No records to save.");
            return;
        }
        let title = if is_multi { " Save selected " } else { " Save all " };
        self.modal = Modal::Form {
            title: title.to_string(),
            label: "path".to_string(),
            input: String::new(),
            action: FormAction::Save,
        };
    }

    pub fn request_load(&mut self) {
        self.modal = Modal::Form {
            title: " Load records ".to_string(),
            label: "path".to_string(),
            input: String::new(),
            action: FormAction::Load,
        };
    }

    pub fn request_replay(&mut self) {
        let records = self.replay_records();
        let Some(first) = records.first() else {
            return;
        };
        let default_addr = format!("{}:{}", first.net.dst(), first.transport.dst());
        self.modal = Modal::Form {
            title: " Server address ".to_string(),
            label: "ip:port".to_string(),
            input: default_addr,
            action: FormAction::Replay,
        };
    }

    pub fn show_help(&mut self) {
        self.modal = Modal::Help;
    }

    pub fn close_modal(&mut self) {
        self.modal = Modal::None;
    }

    /// Run a confirm modal's action.
    pub fn run_confirm(&mut self, action: ConfirmAction) {
        match action {
            ConfirmAction::Quit => self.running = false,
            ConfirmAction::Clear => {
                self.store.clear();
                self.multis.clear();
                self.table_state.select(None);
            }
        }
    }

    /// Run a form modal's action over its input.
    pub fn run_form(&mut self, action: FormAction, input: String) {
        match action {
            FormAction::Save => self.do_save(&input),
            FormAction::Load => self.do_load(&input),
            FormAction::Replay => self.do_replay(input),
        }
    }

    // ------------------------------------------------------------------
    // save / load / replay

    fn do_save(&mut self, path: &str) {
        let records = if self.is_set(MULTI) {
            self.selected_records()
        } else {
            self.store.all()
        };
        match persist::save(&records, Path::new(path)) {
            Ok(()) => self.prompt(format!("Save to {} success", path)),
            Err(err) => {
                tracing::error!(%path, %err, "save failed");
                self.prompt(format!("Save to {} failed, {}", path, err));
            }
        }
    }

    pub fn do_load(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        match persist::load(path, self.codec.as_ref()) {
            Ok(records) => {
                self.store.replace(records);
                self.multis.clear();
                self.table_state.select(self.store.len().checked_sub(1));
                self.prompt(format!("Load from {} success", path.display()));
            }
            Err(err) => {
                tracing::error!(path = %path.display(), %err, "load failed");
                self.prompt(format!("Load from {} failed, err: {}", path.display(), err));
            }
        }
    }

    /// Records a replay would send: the multi selection, or the current row.
    pub fn replay_records(&self) -> Vec<Arc<Record>> {
        if self.is_set(MULTI) {
            self.selected_records()
        } else {
            self.current_row()
                .and_then(|row| self.store.get(row))
                .map(|entry| vec![entry.record.clone()])
                .unwrap_or_default()
        }
    }

    fn do_replay(&mut self, addr: String) {
        let records = self.replay_records();
        let Some(first) = records.first() else {
            return;
        };
        let kind = first.transport_kind;
        tracing::debug!(%addr, count = records.len(), "spawning replay");
        replay::spawn(kind, addr, records, self.hooks.clone(), self.notice_tx.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Body, DecodeError, Decoded, Endpoint, Flow, TransportKind};
    use crate::replay::NoHooks;
    use chrono::Utc;

    struct EchoCodec;

    impl Codec for EchoCodec {
        fn decode(
            &self,
            _net: &Flow,
            _transport: &Flow,
            buf: &[u8],
        ) -> Result<Decoded, DecodeError> {
            let bodies: Vec<Body> = vec![Box::new(buf.to_vec())];
            Ok(Decoded {
                bodies,
                consumed: buf.len(),
            })
        }

        fn brief(&self, record: &Record) -> Vec<String> {
            vec![format!("{}b", record.raw.len())]
        }

        fn detail(&self, record: &Record) -> String {
            format!("{:?}", record.raw)
        }
    }

    fn app(capacity: usize) -> App {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        App::new(
            capacity,
            Arc::new(EchoCodec),
            Arc::new(NoHooks),
            vec![BriefColumn::new("Len", 6)],
            tx,
        )
    }

    fn record(tag: u8) -> Arc<Record> {
        Arc::new(Record {
            transport_kind: TransportKind::Tcp,
            net: Flow::new(
                Endpoint::from_ip("127.0.0.1".parse().unwrap()),
                Endpoint::from_ip("127.0.0.9".parse().unwrap()),
            ),
            transport: Flow::new(Endpoint::tcp_port(5), Endpoint::tcp_port(7777)),
            seen: Utc::now(),
            bodies: vec![Box::new(tag)],
            raw: vec![tag],
        })
    }

    #[test]
    fn status_bits_are_independent() {
        let mut app = app(8);
        app.toggle(FROZEN);
        app.toggle(STOP);
        assert!(app.is_set(FROZEN));
        assert!(app.is_set(STOP));
        assert!(!app.is_set(DETAIL));
        assert!(!app.is_set(MULTI));
        app.toggle(FROZEN);
        assert!(!app.is_set(FROZEN));
        assert!(app.is_set(STOP));
    }

    #[test]
    fn stop_bit_drops_records() {
        let mut app = app(8);
        app.toggle(STOP);
        app.on_record(record(1));
        assert!(app.store.is_empty());
    }

    #[test]
    fn new_record_follows_selection_unless_frozen() {
        let mut app = app(8);
        app.on_record(record(1));
        app.on_record(record(2));
        assert_eq!(app.current_row(), Some(2));

        app.toggle(FROZEN);
        app.on_record(record(3));
        assert_eq!(app.current_row(), Some(2));
    }

    #[test]
    fn eviction_prompts_and_clears_selection() {
        let mut app = app(4);
        app.toggle(MULTI);
        for tag in 1..=4 {
            app.on_record(record(tag));
        }
        app.multis.insert(1);
        app.on_record(record(5));
        assert_eq!(app.prompt, "2 records removed");
        assert!(app.multis.is_empty());
        assert_eq!(app.store.len(), 3);
    }

    #[test]
    fn selection_ops_require_multi_mode() {
        let mut app = app(8);
        for tag in 1..=3 {
            app.on_record(record(tag));
        }
        app.toggle_row_selection();
        app.invert_selection();
        app.select_all_or_none();
        assert!(app.multis.is_empty());
    }

    #[test]
    fn toggle_and_invert_selection() {
        let mut app = app(8);
        for tag in 1..=4 {
            app.on_record(record(tag));
        }
        app.toggle_multi_mode();
        assert!(app.is_set(MULTI));

        app.table_state.select(Some(1)); // row 2
        app.toggle_row_selection();
        assert!(app.multis.contains(&2));

        app.invert_selection();
        assert_eq!(app.multis, [1, 3, 4].into_iter().collect());

        app.toggle_row_selection();
        assert_eq!(app.multis, [1, 2, 3, 4].into_iter().collect());
    }

    #[test]
    fn select_all_toggles_on_full_selection() {
        let mut app = app(8);
        for tag in 1..=3 {
            app.on_record(record(tag));
        }
        app.toggle_multi_mode();
        app.select_all_or_none();
        assert_eq!(app.multis.len(), 3);
        app.select_all_or_none();
        assert!(app.multis.is_empty());
    }

    #[test]
    fn leaving_multi_mode_clears_selection() {
        let mut app = app(8);
        app.on_record(record(1));
        app.toggle_multi_mode();
        app.toggle_row_selection();
        assert!(!app.multis.is_empty());
        app.toggle_multi_mode();
        assert!(!app.is_set(MULTI));
        assert!(app.multis.is_empty());
    }

    #[test]
    fn selected_records_are_in_sequence_order() {
        let mut app = app(8);
        for tag in 1..=5 {
            app.on_record(record(tag));
        }
        app.toggle_multi_mode();
        app.multis.extend([4, 1, 3]);
        let picked: Vec<u8> = app.selected_records().iter().map(|r| r.raw[0]).collect();
        assert_eq!(picked, vec![1, 3, 4]);
    }

    #[test]
    fn request_save_on_empty_store_prompts() {
        let mut app = app(8);
        app.request_save();
        assert_eq!(app.prompt, "No records to save.");
        assert!(matches!(app.modal, Modal::None));
    }

    #[test]
    fn request_save_titles_reflect_scope() {
        let mut app = app(8);
        app.on_record(record(1));
        app.request_save();
        match &app.modal {
            Modal::Form { title, .. } => assert_eq!(title, " Save all "),
            other => panic!("unexpected modal: {:?}", other),
        }

        app.close_modal();
        app.toggle_multi_mode();
        app.toggle_row_selection();
        app.request_save();
        match &app.modal {
            Modal::Form { title, .. } => assert_eq!(title, " Save selected "),
            other => panic!("unexpected modal: {:?}", other),
        }
    }

    #[test]
    fn request_replay_prefills_destination() {
        let mut app = app(8);
        app.on_record(record(1));
        app.request_replay();
        match &app.modal {
            Modal::Form { input, .. } => assert_eq!(input, "127.0.0.9:7777"),
            other => panic!("unexpected modal: {:?}", other),
        }
    }

    #[test]
    fn clear_confirm_empties_store() {
        let mut app = app(8);
        app.on_record(record(1));
        app.request_clear();
        assert!(matches!(app.modal, Modal::Confirm { .. }));
        app.run_confirm(ConfirmAction::Clear);
        assert!(app.store.is_empty());
        assert_eq!(app.current_row(), None);
    }

    #[test]
    fn detail_round_trip() {
        let mut app = app(8);
        app.on_record(record(9));
        app.enter_detail();
        assert!(app.is_set(DETAIL));
        assert_eq!(app.detail_text, "[9]");
        app.leave_detail();
        assert!(!app.is_set(DETAIL));
        assert!(app.detail_text.is_empty());
    }

    #[test]
    fn save_and_load_through_app() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rec.bin");

        let mut app = app(8);
        app.on_record(record(1));
        app.on_record(record(2));
        app.run_form(FormAction::Save, path.to_str().unwrap().to_string());
        assert!(app.prompt.contains("success"));

        app.run_confirm(ConfirmAction::Clear);
        assert!(app.store.is_empty());

        app.run_form(FormAction::Load, path.to_str().unwrap().to_string());
        assert_eq!(app.store.len(), 2);
        let seqs: Vec<u32> = app.store.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn load_failure_leaves_store_unchanged() {
        let mut app = app(8);
        app.on_record(record(1));
        app.run_form(FormAction::Load, "/nonexistent/path.bin".to_string());
        assert!(app.prompt.contains("failed"));
        assert_eq!(app.store.len(), 1);
    }
}
