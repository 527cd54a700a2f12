//! Keyword-based action classification.

use super::{ActionKind, PlayerAction};

/// Metadata keys that may carry an explicit kind override.
const OVERRIDE_KEYS: [&str; 2] = ["action_type", "actionType"];

/// ASCII keywords this short must match a whole word.
const SHORT_KEYWORD_LEN: usize = 3;

/// Keywords that mark a quest action as a completion.
pub const QUEST_COMPLETION_KEYWORDS: &[&str] = &[
    "complete", "completed", "finish", "turn in", "report", "完了", "達成", "報告", "クリア",
];

/// Keywords that mark a movement destination as somewhere new.
pub const NOVELTY_KEYWORDS: &[&str] = &[
    "new", "unknown", "unexplored", "strange", "新しい", "未知", "未踏", "初めて",
];

/// Maps raw player actions to an [`ActionKind`].
///
/// The keyword table is ordered: the first kind with a matching keyword wins.
/// Keywords match case-insensitively as substrings. An ASCII keyword must also
/// start a word, so "attacks" and "walked" match while the "go" in "dragon"
/// does not. Keywords of up to three letters must be the whole word ("go" is
/// not in "goblin"). Keywords are stems where inflection changes the ending.
/// Japanese keywords match anywhere.
#[derive(Debug, Clone)]
pub struct ActionClassifier {
    table: Vec<(ActionKind, Vec<String>)>,
}

impl Default for ActionClassifier {
    fn default() -> Self {
        let table: [(ActionKind, &[&str]); 8] = [
            (
                ActionKind::SystemCommand,
                &[
                    "/save", "/help", "/status", "save game", "load game", "settings", "セーブ",
                    "ロード", "ヘルプ", "ステータス",
                ],
            ),
            (
                ActionKind::Combat,
                &[
                    "attack", "fight", "strik", "slash", "shoot", "battle", "攻撃", "戦う", "戦闘",
                    "斬", "倒す",
                ],
            ),
            (
                ActionKind::SkillUse,
                &["cast", "spell", "skill", "ability", "魔法", "スキル", "唱え", "詠唱"],
            ),
            (
                ActionKind::ItemUse,
                &[
                    "use", "using", "drink", "potion", "equip", "eat", "使う", "飲む", "装備",
                    "アイテム",
                ],
            ),
            (
                ActionKind::Dialogue,
                &["talk", "speak", "ask", "say", "greet", "話", "聞く", "尋ね", "挨拶"],
            ),
            (
                ActionKind::Quest,
                &["quest", "mission", "bounty", "クエスト", "依頼", "任務"],
            ),
            (
                ActionKind::Exploration,
                &[
                    "explor", "search", "investigat", "examin", "look around", "探索", "調べ",
                    "探す", "調査",
                ],
            ),
            (
                ActionKind::Movement,
                &[
                    "go", "went", "walk", "travel", "move", "moving", "head", "enter", "移動",
                    "行く", "向か", "進む", "入る",
                ],
            ),
        ];

        Self::with_table(
            table
                .into_iter()
                .map(|(kind, words)| (kind, words.iter().map(|w| w.to_string()).collect()))
                .collect(),
        )
    }
}

impl ActionClassifier {
    /// Create a classifier with a custom ordered keyword table.
    pub fn with_table(table: Vec<(ActionKind, Vec<String>)>) -> Self {
        let table = table
            .into_iter()
            .map(|(kind, words)| (kind, words.into_iter().map(|w| w.to_lowercase()).collect()))
            .collect();
        Self { table }
    }

    /// Classify an action. An explicit, valid override always wins.
    pub fn classify(&self, action: &PlayerAction) -> ActionKind {
        if let Some(kind) = action.kind {
            return kind;
        }

        let override_kind = OVERRIDE_KEYS
            .iter()
            .filter_map(|key| action.metadata_str(key))
            .find_map(ActionKind::from_label);

        override_kind.unwrap_or_else(|| self.classify_text(&action.text))
    }

    /// Classify free-form text by keyword scan.
    pub fn classify_text(&self, text: &str) -> ActionKind {
        let text = text.to_lowercase();
        self.table
            .iter()
            .find(|(_, words)| words.iter().any(|w| contains_keyword(&text, w)))
            .map(|(kind, _)| *kind)
            .unwrap_or(ActionKind::Unknown)
    }
}

/// Whether `text` contains any of `keywords` (same matching rules as the classifier).
pub fn contains_any_keyword(text: &str, keywords: &[&str]) -> bool {
    let text = text.to_lowercase();
    keywords
        .iter()
        .any(|w| contains_keyword(&text, &w.to_lowercase()))
}

fn contains_keyword(text: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    if !keyword.is_ascii() {
        return text.contains(keyword);
    }

    let whole_word = keyword.len() <= SHORT_KEYWORD_LEN;
    text.match_indices(keyword).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + keyword.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric)
            && !(whole_word && after.is_some_and(char::is_alphanumeric))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_japanese_keywords() {
        let classifier = ActionClassifier::default();
        assert_eq!(classifier.classify_text("森を探索する"), ActionKind::Exploration);
        assert_eq!(classifier.classify_text("ゴブリンを攻撃する"), ActionKind::Combat);
        assert_eq!(classifier.classify_text("村長に話しかける"), ActionKind::Dialogue);
        assert_eq!(classifier.classify_text("北の町へ向かう"), ActionKind::Movement);
    }

    #[test]
    fn test_english_keywords() {
        let classifier = ActionClassifier::default();
        assert_eq!(classifier.classify_text("Attack the wolf"), ActionKind::Combat);
        assert_eq!(classifier.classify_text("cast a fireball"), ActionKind::SkillUse);
        assert_eq!(classifier.classify_text("drink the potion"), ActionKind::ItemUse);
        assert_eq!(classifier.classify_text("accept the quest"), ActionKind::Quest);
        assert_eq!(classifier.classify_text("/save"), ActionKind::SystemCommand);
    }

    #[test]
    fn test_ascii_keywords_must_start_a_word() {
        let classifier = ActionClassifier::default();
        // "go" inside "dragon", "use" inside "because"
        assert_eq!(classifier.classify_text("admire the dragon because"), ActionKind::Unknown);
        assert_eq!(classifier.classify_text("go north"), ActionKind::Movement);
        // Short keywords need the whole word.
        assert_eq!(classifier.classify_text("look at the goblin"), ActionKind::Unknown);
        assert_eq!(classifier.classify_text("a useful trick"), ActionKind::Unknown);
    }

    #[test]
    fn test_inflected_english_forms() {
        let classifier = ActionClassifier::default();
        assert_eq!(classifier.classify_text("attacks the goblin"), ActionKind::Combat);
        assert_eq!(classifier.classify_text("exploring the cave"), ActionKind::Exploration);
        assert_eq!(classifier.classify_text("searching the room"), ActionKind::Exploration);
        assert_eq!(classifier.classify_text("walked north"), ActionKind::Movement);
        assert_eq!(classifier.classify_text("Striking at the shadow"), ActionKind::Combat);
        assert_eq!(classifier.classify_text("using the rope"), ActionKind::ItemUse);
        assert_eq!(classifier.classify_text("moving on"), ActionKind::Movement);
    }

    #[test]
    fn test_table_order_decides_ties() {
        let classifier = ActionClassifier::default();
        // Both combat and movement keywords: combat comes first in the table.
        assert_eq!(classifier.classify_text("walk up and attack"), ActionKind::Combat);
    }

    #[test]
    fn test_unknown_for_empty_and_unmatched() {
        let classifier = ActionClassifier::default();
        assert_eq!(classifier.classify_text(""), ActionKind::Unknown);
        assert_eq!(classifier.classify_text("hmm"), ActionKind::Unknown);
    }

    #[test]
    fn test_explicit_kind_wins() {
        let classifier = ActionClassifier::default();
        let action = PlayerAction::new("attack").with_kind(ActionKind::Dialogue);
        assert_eq!(classifier.classify(&action), ActionKind::Dialogue);
    }

    #[test]
    fn test_metadata_override() {
        let classifier = ActionClassifier::default();

        let action = PlayerAction::new("attack").with_metadata("actionType", json!("quest"));
        assert_eq!(classifier.classify(&action), ActionKind::Quest);

        let action = PlayerAction::new("attack").with_metadata("action_type", json!("item-use"));
        assert_eq!(classifier.classify(&action), ActionKind::ItemUse);
    }

    #[test]
    fn test_invalid_override_falls_back_to_keywords() {
        let classifier = ActionClassifier::default();
        let action = PlayerAction::new("attack").with_metadata("actionType", json!("juggling"));
        assert_eq!(classifier.classify(&action), ActionKind::Combat);

        let action = PlayerAction::new("attack").with_metadata("actionType", json!(42));
        assert_eq!(classifier.classify(&action), ActionKind::Combat);
    }

    #[test]
    fn test_contains_any_keyword() {
        assert!(contains_any_keyword("I want to COMPLETE the quest", QUEST_COMPLETION_KEYWORDS));
        assert!(contains_any_keyword("依頼を達成した", QUEST_COMPLETION_KEYWORDS));
        assert!(!contains_any_keyword("accept the quest", QUEST_COMPLETION_KEYWORDS));
    }

    proptest! {
        #[test]
        fn classify_text_is_total(text in any::<String>()) {
            let kind = ActionClassifier::default().classify_text(&text);
            prop_assert!(ActionKind::ALL.contains(&kind));
        }

        #[test]
        fn classify_with_arbitrary_override_is_total(text in ".*", label in ".*") {
            let action = PlayerAction::new(text).with_metadata("actionType", json!(label));
            let kind = ActionClassifier::default().classify(&action);
            prop_assert!(ActionKind::ALL.contains(&kind));
        }
    }
}
