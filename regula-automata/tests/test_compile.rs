//! Tests for the pattern compiler.

use regula_automata::{compile, ByteAutomaton, Dfa};
use regula_core::{ComplexityBound, CompileConfig, RegulaError};

fn dfa(pattern: &str) -> Dfa {
    compile(pattern, &CompileConfig::default()).unwrap()
}

/// Every string over `alphabet` with at most `max_len` characters.
fn all_strings(alphabet: &[char], max_len: usize) -> Vec<String> {
    let mut out = vec![String::new()];
    let mut frontier = vec![String::new()];
    for _ in 0..max_len {
        let mut next = Vec::new();
        for prefix in &frontier {
            for &c in alphabet {
                let mut s = prefix.clone();
                s.push(c);
                next.push(s);
            }
        }
        out.extend(next.iter().cloned());
        frontier = next;
    }
    out
}

/// Compare full-match acceptance against `regex-automata` on every short string.
fn assert_agrees_with_oracle(pattern: &str, alphabet: &[char], max_len: usize) {
    let ours = dfa(pattern);
    let oracle = regex_automata::meta::Regex::new(&format!("^(?:{pattern})$")).unwrap();
    for s in all_strings(alphabet, max_len) {
        assert_eq!(
            ours.is_match(s.as_bytes()),
            oracle.is_match(s.as_str()),
            "pattern {pattern:?} disagrees on {s:?}"
        );
    }
}

// ===== Structure =====

#[test]
fn test_dfa_simple_literal() {
    let dfa = dfa("abc");
    let initial = dfa.start_state();

    let s1 = dfa.next_state(initial, b'a').expect("a should be valid");
    let s2 = dfa.next_state(s1, b'b').expect("b should be valid");
    let s3 = dfa.next_state(s2, b'c').expect("c should be valid");
    assert!(dfa.is_accepting(s3));
    assert!(!dfa.is_accepting(initial));
    assert!(!dfa.is_accepting(s1));
    assert!(dfa.next_state(s3, b'c').is_none());
}

#[test]
fn test_dfa_alternation() {
    let dfa = dfa("(yes|no)");
    let initial = dfa.start_state();

    let yes = dfa.walk(initial, b"yes").expect("yes valid");
    assert!(dfa.is_accepting(yes));
    let no = dfa.walk(initial, b"no").expect("no valid");
    assert!(dfa.is_accepting(no));

    assert!(dfa.next_state(initial, b'x').is_none());
}

#[test]
fn test_dfa_digit_plus() {
    let dfa = dfa("[0-9]+");
    let initial = dfa.start_state();

    let s1 = dfa.next_state(initial, b'5').expect("digit valid");
    assert!(dfa.is_accepting(s1));
    let s2 = dfa.next_state(s1, b'3').expect("second digit valid");
    assert!(dfa.is_accepting(s2));
    assert!(dfa.next_state(initial, b'a').is_none());
}

#[test]
fn test_every_state_is_live() {
    let dfa = dfa("(ab|cd)*e?f{2,3}");
    for state in 0..dfa.state_count() as u32 {
        // Breadth-first search for an accepting state.
        let mut seen = vec![false; dfa.state_count()];
        let mut queue = std::collections::VecDeque::from([state]);
        let mut found = false;
        while let Some(s) = queue.pop_front() {
            if dfa.is_accepting(s) {
                found = true;
                break;
            }
            for &next in dfa.row(s) {
                if next != regula_core::DEAD_STATE && !seen[next as usize] {
                    seen[next as usize] = true;
                    queue.push_back(next);
                }
            }
        }
        assert!(found, "state {state} cannot reach an accepting state");
    }
}

#[test]
fn test_compilation_is_deterministic() {
    let pattern = r"[a-z]{2,4}(-[0-9]+)?|é+";
    assert_eq!(dfa(pattern), dfa(pattern));
}

// ===== Language =====

#[test]
fn test_matches_agree_with_regex_automata() {
    let patterns = [
        "a|ab",
        "(a|b)*abb",
        "a{2,3}b?",
        "(ab)+|ba*",
        "[^b]c*",
        "a*?b+?",
        "",
        "(a|)(b|)",
    ];
    for pattern in patterns {
        assert_agrees_with_oracle(pattern, &['a', 'b', 'c'], 5);
    }
}

#[test]
fn test_unicode_classes_agree_with_regex_automata() {
    assert_agrees_with_oracle("[à-ï]+x?", &['a', 'x', 'à', 'é', 'ï', 'ð'], 3);
    assert_agrees_with_oracle("(?i)straße|ü", &['s', 'S', 'ß', 'ü', 'Ü', 't'], 2);
    assert_agrees_with_oracle(".", &['a', '\n', '😀'], 2);
}

#[test]
fn test_anchors_are_resolved_at_compile_time() {
    let anchored = dfa("^abc$");
    assert!(anchored.is_match(b"abc"));
    assert!(!anchored.is_match(b"abcabc"));

    // A start anchor after consumed input can never hold.
    let dfa = dfa("a|b^c");
    assert!(dfa.is_match(b"a"));
    assert!(dfa.next_state(dfa.start_state(), b'b').is_none());

    assert_agrees_with_oracle("(^a|b)+$", &['a', 'b'], 4);
    assert_agrees_with_oracle("a$|ab", &['a', 'b'], 3);
}

#[test]
fn test_empty_pattern_accepts_only_empty_string() {
    let dfa = dfa("");
    assert!(dfa.is_accepting(dfa.start_state()));
    assert_eq!(dfa.state_count(), 1);
    assert!(!dfa.is_match(b"a"));
}

#[test]
fn test_partial_utf8_walk_stays_live() {
    let dfa = dfa("€+");
    let euro = "€".as_bytes();
    let mid = dfa.walk(dfa.start_state(), &euro[..2]).expect("prefix of € is live");
    assert!(!dfa.is_accepting(mid));
    let done = dfa.walk(mid, &euro[2..]).expect("completing € is valid");
    assert!(dfa.is_accepting(done));
    assert!(dfa.walk(dfa.start_state(), &euro[1..]).is_none());
}

// ===== Errors =====

#[test]
fn test_invalid_pattern_returns_error() {
    assert!(matches!(
        compile("[invalid", &CompileConfig::default()),
        Err(RegulaError::Pattern(_))
    ));
    assert!(matches!(
        compile("(unclosed", &CompileConfig::default()),
        Err(RegulaError::Pattern(_))
    ));
}

#[test]
fn test_backreference_and_lookaround_rejected() {
    for pattern in [r"(a)\1", "a(?=b)", "(?<!x)y"] {
        assert!(
            matches!(compile(pattern, &CompileConfig::default()), Err(RegulaError::Pattern(_))),
            "{pattern} should be rejected"
        );
    }
}

#[test]
fn test_repetition_bound() {
    let config = CompileConfig {
        max_repetition: 100,
        ..Default::default()
    };
    assert!(compile("a{100}", &config).is_ok());
    let err = compile("a{2,101}", &config).unwrap_err();
    assert!(matches!(
        err,
        RegulaError::PatternTooComplex {
            bound: ComplexityBound::Repetition,
            limit: 100
        }
    ));
}

#[test]
fn test_dfa_state_bound() {
    let config = CompileConfig {
        max_dfa_states: 16,
        ..Default::default()
    };
    // (a|b)*a(a|b){5} needs 2^6 states.
    let err = compile("(a|b)*a(a|b){5}", &config).unwrap_err();
    assert!(matches!(
        err,
        RegulaError::PatternTooComplex {
            bound: ComplexityBound::DfaStates,
            ..
        }
    ));
}

#[test]
fn test_pattern_length_bound() {
    let config = CompileConfig {
        max_pattern_len: 4,
        ..Default::default()
    };
    let err = compile("abcde", &config).unwrap_err();
    assert!(matches!(
        err,
        RegulaError::PatternTooComplex {
            bound: ComplexityBound::PatternLength,
            limit: 4
        }
    ));
}

#[test]
fn test_pattern_matching_nothing_is_unsatisfiable() {
    let err = compile(r"[^\s\S]", &CompileConfig::default()).unwrap_err();
    assert!(matches!(err, RegulaError::UnsatisfiablePattern(_)));
    let err = compile("a$b", &CompileConfig::default()).unwrap_err();
    assert!(matches!(err, RegulaError::UnsatisfiablePattern(_)));
}
