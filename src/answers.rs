// Answer Table Module
// Fixed question → answer table behind the suggestions endpoint.

use serde::{Deserialize, Serialize};

/// Answer streamed when no question matches
pub const DEFAULT_ANSWER: &str = "안녕하세요! 로봇 안내 시스템입니다. 어떤 도움이 필요하신가요?";

/// One entry of the answer table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerEntry {
    pub question: String,
    pub answer: String,
}

impl AnswerEntry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// A suggested question as listed by `GET /api/suggestions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: u32,
    pub text: String,
}

/// Body of `GET /api/suggestions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionsResponse {
    pub suggestions: Vec<Suggestion>,
}

/// The built-in guide-robot answers
pub fn default_entries() -> Vec<AnswerEntry> {
    vec![
        AnswerEntry::new(
            "Physical AI에 대해서 설명해줘",
            "Physical AI는 물리적 공간에서 작동하는 인공지능 시스템입니다. 로봇, 드론, 자율주행 차량 등 실제 환경과 상호작용하며 지능적인 의사결정을 내리는 AI를 의미합니다. 이는 단순히 데이터를 처리하는 것이 아니라, 센서를 통해 환경을 인식하고, 물리적 행동을 통해 환경에 영향을 미치는 지능형 시스템입니다.",
        ),
        AnswerEntry::new(
            "여기서 제일 핫한 전시가 뭐야?",
            "현재 가장 인기 있는 전시는 '미래의 로봇과 함께 살아가기' 전시입니다. 이 전시에서는 실제 작동하는 Physical AI 로봇들을 직접 체험하고, 로봇과의 상호작용을 통해 미래의 생활 방식을 미리 경험해볼 수 있습니다. 특히 가정용 서비스 로봇, 교육용 AI 로봇, 그리고 산업용 협동 로봇의 데모를 제공하고 있어 많은 관심을 받고 있습니다.",
        ),
        AnswerEntry::new(
            "어떤 AI 모델을 가지고 있어?",
            "저는 GPT-4 기반의 대화형 AI 모델과 컴퓨터 비전을 위한 Vision Transformer 모델, 그리고 물리적 환경 이해를 위한 다중 모달 AI 모델을 탑재하고 있습니다. 이러한 모델들이 통합되어 언어 이해, 시각 인식, 공간 인식, 그리고 의사결정을 종합적으로 수행할 수 있습니다. 특히 Reinforcement Learning을 통해 환경과의 상호작용을 학습하여 지속적으로 성능을 개선하고 있습니다.",
        ),
    ]
}

/// Ordered question → answer lookup
#[derive(Debug, Clone)]
pub struct AnswerBook {
    entries: Vec<AnswerEntry>,
    default_answer: String,
}

impl AnswerBook {
    pub fn new(entries: Vec<AnswerEntry>, default_answer: impl Into<String>) -> Self {
        Self {
            entries,
            default_answer: default_answer.into(),
        }
    }

    /// Find the answer entry for a question: exact match first, then the
    /// first entry where either text contains the other. Empty questions
    /// never match.
    pub fn find(&self, question: &str) -> Option<&AnswerEntry> {
        if question.is_empty() {
            return None;
        }

        self.entries
            .iter()
            .find(|entry| entry.question == question)
            .or_else(|| {
                self.entries.iter().find(|entry| {
                    question.contains(entry.question.as_str())
                        || entry.question.contains(question)
                })
            })
    }

    /// Answer text for a question, falling back to the default greeting
    pub fn answer_for(&self, question: Option<&str>) -> &str {
        question
            .and_then(|q| self.find(q))
            .map(|entry| entry.answer.as_str())
            .unwrap_or(&self.default_answer)
    }

    /// Suggested questions, numbered from 1 in table order
    pub fn suggestions(&self) -> Vec<Suggestion> {
        self.entries
            .iter()
            .zip(1..)
            .map(|(entry, id)| Suggestion {
                id,
                text: entry.question.clone(),
            })
            .collect()
    }

    pub fn default_answer(&self) -> &str {
        &self.default_answer
    }
}

impl Default for AnswerBook {
    fn default() -> Self {
        Self::new(default_entries(), DEFAULT_ANSWER)
    }
}
