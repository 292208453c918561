//! Terminal implementation of the `Resolver` decisions.
//!
//! Questions go to stderr, answers come from stdin. An empty line or EOF
//! dismisses the prompt, which the engine treats as Cancel.

use async_trait::async_trait;
use draft_sync::{
    CheckFailureChoice, ConflictChoice, ConflictRecord, Confirmation, ImmutableStateChoice,
    RemoteError, ResourceIdentifier, Resolver,
};
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

type Input = Box<dyn AsyncBufRead + Unpin + Send>;
type Output = Box<dyn Write + Send>;

pub struct TerminalResolver {
    input: Mutex<Input>,
    output: std::sync::Mutex<Output>,
}

impl TerminalResolver {
    pub fn new(input: impl AsyncBufRead + Unpin + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            input: Mutex::new(Box::new(input)),
            output: std::sync::Mutex::new(Box::new(output)),
        }
    }

    /// Prompt on stderr, read answers from stdin.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), std::io::stderr())
    }

    fn say(&self, text: &str) {
        let mut output = self.output.lock().unwrap_or_else(|e| e.into_inner());
        // A closed terminal leaves nothing useful to do with the error
        let _ = output.write_all(text.as_bytes());
        let _ = output.flush();
    }

    /// Ask until the answer names an option, by number or label. Empty input
    /// or EOF returns `None`.
    async fn ask<T: Copy>(&self, question: &str, options: &[(&str, T)]) -> Option<T> {
        let menu: Vec<String> = options
            .iter()
            .enumerate()
            .map(|(i, (label, _))| format!("[{}] {}", i + 1, label))
            .collect();

        let mut input = self.input.lock().await;
        loop {
            self.say(&format!("{}\n  {}\n> ", question, menu.join("  ")));

            let mut line = String::new();
            match input.read_line(&mut line).await {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
            let answer = line.trim();
            if answer.is_empty() {
                return None;
            }
            if let Some(choice) = pick(answer, options) {
                return Some(choice);
            }
            self.say(&format!("Unrecognized choice {:?}\n", answer));
        }
    }
}

fn pick<T: Copy>(answer: &str, options: &[(&str, T)]) -> Option<T> {
    if let Ok(n) = answer.parse::<usize>() {
        return options.get(n.checked_sub(1)?).map(|(_, value)| *value);
    }
    options
        .iter()
        .find(|(label, _)| label.eq_ignore_ascii_case(answer))
        .map(|(_, value)| *value)
}

/// Largest LCS table (cells) `render_diff` will build, about 16 MB.
const MAX_DIFF_CELLS: usize = 4_000_000;

/// Line diff of local vs remote content, `-` for local-only lines and `+` for
/// remote-only lines.
///
/// Lines shared at the start and end are matched directly. When the changed
/// middle is too large to diff, both sides are printed whole instead.
pub fn render_diff(local: &str, remote: &str) -> String {
    let a: Vec<&str> = local.lines().collect();
    let b: Vec<&str> = remote.lines().collect();

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();
    let mid_a = &a[prefix..a.len() - suffix];
    let mid_b = &b[prefix..b.len() - suffix];

    let mut out = String::from("--- local\n+++ remote\n");
    let cells = (mid_a.len() + 1).saturating_mul(mid_b.len() + 1);
    if cells > MAX_DIFF_CELLS {
        out.push_str(&format!(
            "(changes span {} local and {} remote lines; showing both in full)\n",
            mid_a.len(),
            mid_b.len()
        ));
        push_lines(&mut out, "- ", &a);
        push_lines(&mut out, "+ ", &b);
        return out;
    }

    push_lines(&mut out, "  ", &a[..prefix]);
    diff_lines(&mut out, mid_a, mid_b);
    push_lines(&mut out, "  ", &a[a.len() - suffix..]);
    out
}

fn push_lines(out: &mut String, marker: &str, lines: &[&str]) {
    for line in lines {
        out.push_str(marker);
        out.push_str(line);
        out.push('\n');
    }
}

fn diff_lines(out: &mut String, a: &[&str], b: &[&str]) {
    let width = b.len() + 1;
    // lcs[i * width + j] = LCS length of a[i..] and b[j..]
    let mut lcs = vec![0u32; (a.len() + 1) * width];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        if i < a.len() && j < b.len() && a[i] == b[j] {
            push_lines(out, "  ", &a[i..=i]);
            i += 1;
            j += 1;
        } else if j == b.len() || (i < a.len() && lcs[(i + 1) * width + j] >= lcs[i * width + j + 1])
        {
            push_lines(out, "- ", &a[i..=i]);
            i += 1;
        } else {
            push_lines(out, "+ ", &b[j..=j]);
            j += 1;
        }
    }
}

#[async_trait]
impl Resolver for TerminalResolver {
    async fn resolve_conflict(&self, record: &ConflictRecord) -> Option<ConflictChoice> {
        let question = format!(
            "{} was changed remotely ({}) since you opened it ({}).",
            record.identifier, record.remote_modified_on, record.local_modified_on
        );
        self.ask(
            &question,
            &[
                ("Overwrite", ConflictChoice::Overwrite),
                ("Discard", ConflictChoice::Discard),
                ("View diff", ConflictChoice::ViewDiff),
                ("Cancel", ConflictChoice::Cancel),
            ],
        )
        .await
    }

    async fn show_diff(&self, record: &ConflictRecord) {
        let local = String::from_utf8_lossy(&record.local_content);
        let remote = String::from_utf8_lossy(&record.remote_content);
        self.say(&render_diff(&local, &remote));
    }

    async fn confirm_overwrite(&self, record: &ConflictRecord) -> Option<Confirmation> {
        let question = format!(
            "Overwrite the remote changes to {}? They will be lost.",
            record.identifier
        );
        self.ask(
            &question,
            &[
                ("Yes, Overwrite", Confirmation::Yes),
                ("No, Cancel", Confirmation::No),
            ],
        )
        .await
    }

    async fn resolve_check_failure(
        &self,
        identifier: &ResourceIdentifier,
        error: &RemoteError,
    ) -> Option<CheckFailureChoice> {
        let question = format!(
            "Could not check {} for remote changes: {}",
            identifier, error
        );
        let mut options = vec![
            ("Force Save", CheckFailureChoice::ForceSave),
            ("Cancel", CheckFailureChoice::Cancel),
        ];
        // Asking again cannot help when the error is permanent
        if error.is_retryable() {
            options.insert(0, ("Retry", CheckFailureChoice::Retry));
        }
        self.ask(&question, &options).await
    }

    async fn resolve_immutable_state(
        &self,
        identifier: &ResourceIdentifier,
        error: &RemoteError,
    ) -> Option<ImmutableStateChoice> {
        let question = format!("{} can no longer be edited: {}", identifier, error);
        self.ask(
            &question,
            &[
                ("Create new draft", ImmutableStateChoice::CreateNewDraft),
                ("Discard", ImmutableStateChoice::Discard),
                ("Cancel", ImmutableStateChoice::Cancel),
            ],
        )
        .await
    }

    async fn report_failure(&self, identifier: &ResourceIdentifier, error: &RemoteError) {
        self.say(&format!("Failed to save {}: {}\n", identifier, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    /// Output sink the test can read back.
    #[derive(Clone, Default)]
    struct Captured(Arc<StdMutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn resolver(input: &'static str) -> (TerminalResolver, Captured) {
        let captured = Captured::default();
        (TerminalResolver::new(input.as_bytes(), captured.clone()), captured)
    }

    fn id() -> ResourceIdentifier {
        ResourceIdentifier::new("g", "a", "1")
    }

    #[tokio::test]
    async fn test_choice_by_number_and_label() {
        let (resolver, _) = resolver("2\nforce save\n");
        let err = RemoteError::transport("offline");

        assert_eq!(
            resolver.resolve_check_failure(&id(), &err).await,
            Some(CheckFailureChoice::ForceSave)
        );
        assert_eq!(
            resolver.resolve_check_failure(&id(), &err).await,
            Some(CheckFailureChoice::ForceSave)
        );
    }

    #[tokio::test]
    async fn test_invalid_answer_asks_again() {
        let (resolver, output) = resolver("9\nmaybe\n1\n");
        let err = RemoteError::ImmutableState("published".into());

        assert_eq!(
            resolver.resolve_immutable_state(&id(), &err).await,
            Some(ImmutableStateChoice::CreateNewDraft)
        );
        assert_eq!(output.text().matches("Unrecognized choice").count(), 2);
    }

    #[tokio::test]
    async fn test_empty_line_and_eof_dismiss() {
        let (resolver, _) = resolver("\n");
        let err = RemoteError::transport("offline");

        assert_eq!(resolver.resolve_check_failure(&id(), &err).await, None);
        assert_eq!(resolver.resolve_check_failure(&id(), &err).await, None);
    }

    #[tokio::test]
    async fn test_report_failure_is_printed() {
        let (resolver, output) = resolver("");
        resolver
            .report_failure(&id(), &RemoteError::Other("boom".into()))
            .await;
        assert_eq!(output.text(), "Failed to save g/a@1: Remote error: boom\n");
    }

    #[test]
    fn test_render_diff() {
        let diff = render_diff("a\nb\nc\n", "a\nB\nc\nd\n");
        assert_eq!(diff, "--- local\n+++ remote\n  a\n- b\n+ B\n  c\n+ d\n");
    }

    #[test]
    fn test_render_diff_identical() {
        let diff = render_diff("same\n", "same\n");
        assert_eq!(diff, "--- local\n+++ remote\n  same\n");
    }

    fn numbered(prefix: &str, count: usize) -> String {
        (0..count).map(|i| format!("{}{}\n", prefix, i)).collect()
    }

    #[test]
    fn test_render_diff_large_disjoint_inputs_print_both_sides() {
        let local = numbered("local ", 30_000);
        let remote = numbered("remote ", 30_000);

        let started = std::time::Instant::now();
        let diff = render_diff(&local, &remote);

        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert!(diff.contains("showing both in full"));
        assert_eq!(diff.lines().filter(|l| l.starts_with("- local ")).count(), 30_000);
        assert_eq!(diff.lines().filter(|l| l.starts_with("+ remote ")).count(), 30_000);
    }

    #[test]
    fn test_render_diff_large_inputs_with_small_change() {
        let local = numbered("line ", 50_000);
        let remote = local.replacen("line 25000\n", "line 25000 changed\n", 1);

        let diff = render_diff(&local, &remote);

        assert!(!diff.contains("showing both in full"));
        assert!(diff.contains("\n- line 25000\n+ line 25000 changed\n"));
        assert_eq!(diff.lines().filter(|l| l.starts_with("  ")).count(), 49_999);
    }

    #[tokio::test]
    async fn test_retry_offered_only_for_retryable_errors() {
        let (resolver, output) = resolver("1\n1\n");

        let permanent = RemoteError::NotFound("gone".into());
        assert_eq!(
            resolver.resolve_check_failure(&id(), &permanent).await,
            Some(CheckFailureChoice::ForceSave)
        );
        assert!(!output.text().contains("Retry"));

        let transient = RemoteError::transport("timeout");
        assert_eq!(
            resolver.resolve_check_failure(&id(), &transient).await,
            Some(CheckFailureChoice::Retry)
        );
        assert!(output.text().contains("[1] Retry"));
    }
}
