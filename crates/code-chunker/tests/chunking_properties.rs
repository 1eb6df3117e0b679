use pretty_assertions::assert_eq;
use proptest::prelude::*;
use stata_code_chunker::{
    Blocker, ChunkPlan, ChunkPlanner, Chunker, Completeness, DelimiterMode, SourceSubmission,
};

fn plan(text: &str, mode: DelimiterMode) -> ChunkPlan {
    let output = Chunker::default().chunk_str(text, mode).expect("chunk");
    ChunkPlanner::default().plan(output, mode).expect("plan")
}

fn executable_texts(plan: &ChunkPlan) -> Vec<String> {
    plan.executable().map(|s| s.text().to_string()).collect()
}

fn command() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["di", "gen", "summarize", "regress", "tab"]),
        prop::collection::vec("[a-z0-9]{1,5}", 0..4),
    )
        .prop_map(|(verb, args)| {
            if args.is_empty() {
                verb.to_string()
            } else {
                format!("{verb} {}", args.join(" "))
            }
        })
}

fn statement() -> impl Strategy<Value = String> {
    command().prop_recursive(3, 16, 4, |inner| {
        prop::collection::vec(inner, 1..4)
            .prop_map(|body| format!("foreach v in a b {{\n{}\n}}", body.join("\n")))
    })
}

fn program() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(statement(), 1..6)
}

proptest! {
    #[test]
    fn proptest_balanced_program_is_complete(items in program()) {
        let text = items.join("\n");
        let output = Chunker::default()
            .chunk_str(&text, DelimiterMode::Newline)
            .expect("chunk");
        prop_assert_eq!(&output.completeness, &Completeness::Complete);
        prop_assert_eq!(output.ending_mode, DelimiterMode::Newline);
        prop_assert_eq!(output.executable().count(), items.len());
    }

    #[test]
    fn proptest_unclosed_block_is_incomplete(items in program()) {
        let text = format!("if 1 {{\n{}\n", items.join("\n"));
        let output = Chunker::default()
            .chunk_str(&text, DelimiterMode::Newline)
            .expect("chunk");
        let is_open_brace = matches!(
            output.completeness,
            Completeness::Incomplete(Blocker::OpenBrace { depth }) if depth >= 1
        );
        prop_assert!(is_open_brace);
    }

    #[test]
    fn proptest_rendered_source_chunks_back_identically(items in program()) {
        let original = plan(&items.join("\n"), DelimiterMode::Newline);
        for mode in [DelimiterMode::Newline, DelimiterMode::Semicolon] {
            let rendered = original.render_source(mode);
            let replanned = plan(&rendered, mode);
            prop_assert_eq!(executable_texts(&replanned), executable_texts(&original));
            prop_assert_eq!(&replanned.fingerprint, &original.fingerprint);
        }
    }

    #[test]
    fn proptest_fingerprint_ignores_layout(items in program(), pad in "[ \t]{0,3}") {
        let plain = plan(&items.join("\n"), DelimiterMode::Newline);
        let padded_text = items
            .iter()
            .map(|item| {
                item.lines()
                    .map(|line| format!("{pad}{line}{pad} // note"))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect::<Vec<_>>()
            .join("\n\n* spacer\n");
        let padded = plan(&padded_text, DelimiterMode::Newline);
        prop_assert_eq!(plain.fingerprint, padded.fingerprint);
    }

    #[test]
    fn proptest_fingerprint_changes_with_content(items in program(), extra in command()) {
        let base = plan(&items.join("\n"), DelimiterMode::Newline);
        let again = plan(&items.join("\n"), DelimiterMode::Newline);
        prop_assert_eq!(&base.fingerprint, &again.fingerprint);

        let extended = plan(&format!("{}\n{extra}", items.join("\n")), DelimiterMode::Newline);
        prop_assert_ne!(&base.fingerprint, &extended.fingerprint);
    }
}

#[test]
fn delimiter_mode_carries_into_next_submission() {
    let chunker = Chunker::default();
    let first = chunker
        .chunk(&SourceSubmission::new("#delimit ;", DelimiterMode::Newline))
        .expect("chunk");
    assert_eq!(first.ending_mode, DelimiterMode::Semicolon);

    let second = chunker
        .chunk(&SourceSubmission::new("di 1;\ndi\n2;", first.ending_mode))
        .expect("chunk");
    let texts: Vec<_> = second.executable().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["di 1", "di 2"]);
    assert_eq!(second.ending_mode, DelimiterMode::Semicolon);
}

#[test]
fn continuation_across_lines_is_one_statement() {
    let p = plan("di 1 + ///\n  2\n", DelimiterMode::Newline);
    assert_eq!(executable_texts(&p), vec!["di 1 + 2"]);
}

#[test]
fn single_line_braces_stay_complete() {
    assert!(Chunker::default().is_complete("{ di 1 }", DelimiterMode::Newline));
    assert!(!Chunker::default().is_complete("{\ndi 1", DelimiterMode::Newline));
}

#[test]
fn semicolon_inside_string_does_not_split() {
    let p = plan("di \"a;b\";\ndi 2;", DelimiterMode::Semicolon);
    assert_eq!(executable_texts(&p), vec!["di \"a;b\"", "di 2"]);
}
