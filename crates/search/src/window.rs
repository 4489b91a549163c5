//! Conversation window: bounds how much transcript reaches the engines.

use graphchat_core::message::Message;

/// Bound `turns` to the `max_turns` most recent turns.
///
/// A transcript longer than `max_turns + 1` is cut to its last `max_turns`
/// turns behind a fresh `persona` system turn. Anything shorter passes
/// through untouched, including its own leading system turn.
pub fn window(turns: &[Message], max_turns: usize, persona: &str) -> Vec<Message> {
    if turns.len() <= max_turns + 1 {
        return turns.to_vec();
    }

    let mut windowed = Vec::with_capacity(max_turns + 1);
    windowed.push(Message::system(persona));
    windowed.extend_from_slice(&turns[turns.len() - max_turns..]);
    windowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphchat_core::message::Role;

    fn transcript(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    Message::user(format!("question {i}"))
                } else {
                    Message::assistant(format!("answer {i}"))
                }
            })
            .collect()
    }

    #[test]
    fn short_histories_pass_through() {
        for n in 0..=21 {
            let turns = transcript(n);
            assert_eq!(window(&turns, 20, "persona"), turns, "length {n}");
        }
    }

    #[test]
    fn long_history_keeps_persona_and_recent_turns() {
        let turns = transcript(26);
        let windowed = window(&turns, 20, "persona");

        assert_eq!(windowed.len(), 21);
        assert_eq!(windowed[0], Message::system("persona"));
        assert_eq!(&windowed[1..], &turns[6..]);
    }

    #[test]
    fn client_system_turn_is_replaced_once_cut() {
        let mut turns = vec![Message::system("client prompt")];
        turns.extend(transcript(30));
        let windowed = window(&turns, 20, "persona");

        assert_eq!(windowed.iter().filter(|m| m.role == Role::System).count(), 1);
        assert_eq!(windowed[0].content, "persona");
    }

    #[test]
    fn zero_turn_window() {
        let windowed = window(&transcript(3), 0, "persona");
        assert_eq!(windowed, vec![Message::system("persona")]);
    }
}
