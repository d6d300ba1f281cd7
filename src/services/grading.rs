//! 批改引擎
//!
//! 把答案卷与学生答卷的提取结构对账成 `GradingResult`：
//! 1. 本地字面匹配
//! 2. 挑出需要语义判定的候选（非哨兵 + 表述题启发式）
//! 3. 一次批量调用语义校验，按结论翻转
//! 4. 以答案卷的题目集合为准汇总分数
//!
//! 语义校验失败会被吞掉：临时判错的结果保持原样，
//! 批改本身绝不因可选的兜底而失败。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clients::{SemanticVerifier, VerifyCandidate};
use crate::models::grading::{is_sentinel, UNWRITTEN};
use crate::models::{
    AnswerKeyStructure, GradingResult, Position, QuestionResult, Score, StudentExamStructure,
};
use crate::services::matcher::{self, ScriptKind};

/// 批改引擎
pub struct GradingEngine {
    verifier: Arc<dyn SemanticVerifier>,
    semantic_scripts: Vec<ScriptKind>,
}

impl GradingEngine {
    pub fn new(verifier: Arc<dyn SemanticVerifier>, semantic_scripts: Vec<ScriptKind>) -> Self {
        Self {
            verifier,
            semantic_scripts,
        }
    }

    /// 批改一份答卷
    ///
    /// 题目集合永远取自答案卷：学生多写、少写都不影响总分母。
    pub async fn score(
        &self,
        submission_id: &str,
        key: &AnswerKeyStructure,
        exam: &StudentExamStructure,
    ) -> GradingResult {
        let mut results = Vec::with_capacity(key.answers.len());
        let mut candidates = Vec::new();

        // ========== 本地字面匹配 ==========
        for (number, key_answer) in &key.answers {
            let raw = exam
                .answers
                .get(number)
                .map(String::as_str)
                .unwrap_or(UNWRITTEN);

            let is_correct = !is_sentinel(raw) && matcher::is_equivalent(raw, &key_answer.text);

            // 字面没对上的表述题才值得花一次语义判定
            if !is_correct
                && !is_sentinel(raw)
                && matcher::needs_semantic_review(&key_answer.text, &self.semantic_scripts)
            {
                candidates.push(VerifyCandidate {
                    id: number.to_string(),
                    student_answer: raw.to_string(),
                    correct_answer: key_answer.text.clone(),
                });
            }

            results.push(QuestionResult {
                question_number: *number,
                student_answer: raw.to_string(),
                correct_answer: key_answer.text.clone(),
                is_correct,
                is_edited: false,
                position: Some(Position {
                    x: key_answer.x.clamp(0.0, 1.0),
                    y: key_answer.y.clamp(0.0, 1.0),
                    page: key_answer.page.unwrap_or(1),
                }),
            });
        }

        // ========== 批量语义兜底 ==========
        if !candidates.is_empty() {
            debug!("{} 条候选进入语义校验", candidates.len());
            match self.verifier.verify_batch(&candidates).await {
                Ok(verdicts) => {
                    for verdict in verdicts.iter().filter(|v| v.is_correct) {
                        if let Ok(number) = verdict.id.parse::<u32>() {
                            if let Some(result) =
                                results.iter_mut().find(|r| r.question_number == number)
                            {
                                result.is_correct = true;
                            }
                        }
                    }
                    info!(
                        "✓ 语义校验完成: {}/{} 条改判正确",
                        verdicts.iter().filter(|v| v.is_correct).count(),
                        candidates.len()
                    );
                }
                // 兜底失败不致命，保留本地判定结果
                Err(e) => warn!("⚠️ 语义校验失败，保留字面匹配结果: {}", e),
            }
        }

        let score = aggregate(&results);
        GradingResult {
            submission_id: submission_id.to_string(),
            student_name: Some(exam.student_name.clone()).filter(|n| !n.is_empty()),
            score,
            results,
        }
    }

    /// 教师改写某题的学生答案后重算
    ///
    /// 纯同步：只重跑文本匹配器，不触发任何外部调用。
    pub fn recalculate_after_edit(
        &self,
        submission_id: &str,
        results: &[QuestionResult],
        question_number: u32,
        new_answer: &str,
    ) -> GradingResult {
        let mut results = results.to_vec();
        if let Some(result) = results
            .iter_mut()
            .find(|r| r.question_number == question_number)
        {
            result.student_answer = new_answer.to_string();
            result.is_correct = matcher::is_equivalent(new_answer, &result.correct_answer);
            result.is_edited = true;
        } else {
            warn!("改写的题号不存在: {}", question_number);
        }

        let score = aggregate(&results);
        GradingResult {
            submission_id: submission_id.to_string(),
            student_name: None,
            score,
            results,
        }
    }

    /// 教师手动覆盖某题的判定
    ///
    /// 完全绕过匹配器，直接采用教师给的结论。
    pub fn toggle_correct_status(
        &self,
        submission_id: &str,
        results: &[QuestionResult],
        question_number: u32,
        new_is_correct: bool,
    ) -> GradingResult {
        let mut results = results.to_vec();
        if let Some(result) = results
            .iter_mut()
            .find(|r| r.question_number == question_number)
        {
            result.is_correct = new_is_correct;
            result.is_edited = true;
        } else {
            warn!("覆盖的题号不存在: {}", question_number);
        }

        let score = aggregate(&results);
        GradingResult {
            submission_id: submission_id.to_string(),
            student_name: None,
            score,
            results,
        }
    }
}

/// 从完整结果集汇总分数
fn aggregate(results: &[QuestionResult]) -> Score {
    let total = results.len() as u32;
    let correct = results.iter().filter(|r| r.is_correct).count() as u32;
    let percentage = if total > 0 {
        correct as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    Score {
        correct,
        total,
        percentage,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::clients::MockVerifier;
    use crate::error::AppError;
    use crate::models::KeyAnswer;

    fn key_of(entries: &[(u32, &str)]) -> AnswerKeyStructure {
        let answers: BTreeMap<u32, KeyAnswer> = entries
            .iter()
            .map(|(n, text)| {
                (
                    *n,
                    KeyAnswer {
                        text: text.to_string(),
                        x: 0.2,
                        y: 0.3,
                        page: None,
                    },
                )
            })
            .collect();
        AnswerKeyStructure {
            title: "테스트".to_string(),
            total_questions: answers.len() as u32,
            answers,
        }
    }

    fn exam_of(name: &str, entries: &[(u32, &str)]) -> StudentExamStructure {
        StudentExamStructure {
            student_name: name.to_string(),
            total_questions: entries.len() as u32,
            answers: entries
                .iter()
                .map(|(n, a)| (*n, a.to_string()))
                .collect(),
        }
    }

    fn engine() -> (GradingEngine, Arc<MockVerifier>) {
        let verifier = Arc::new(MockVerifier::default());
        (
            GradingEngine::new(verifier.clone(), vec![ScriptKind::Hangul]),
            verifier,
        )
    }

    #[tokio::test]
    async fn variant_answer_matches_locally() {
        let (engine, verifier) = engine();
        let result = engine
            .score("s1", &key_of(&[(1, "A/B")]), &exam_of("김철수", &[(1, "b")]))
            .await;
        assert!(result.results[0].is_correct);
        assert_eq!(result.score.correct, 1);
        assert_eq!(result.score.total, 1);
        assert_eq!(result.score.percentage, 100.0);
        // 字面已对上，不该发起语义调用
        assert_eq!(verifier.call_count(), 0);
    }

    #[tokio::test]
    async fn total_always_comes_from_answer_key() {
        let (engine, _) = engine();
        // 学生只写了 1 题，答案卷有 3 题
        let result = engine
            .score(
                "s1",
                &key_of(&[(1, "a"), (2, "b"), (3, "c")]),
                &exam_of("이영희", &[(2, "b")]),
            )
            .await;
        assert_eq!(result.score.total, 3);
        assert_eq!(result.score.correct, 1);
        assert_eq!(result.results.len(), 3);
        // 缺答的题以哨兵记录
        assert_eq!(result.results[0].student_answer, UNWRITTEN);
    }

    #[tokio::test]
    async fn empty_key_scores_zero_percent() {
        let (engine, _) = engine();
        let result = engine.score("s1", &key_of(&[]), &exam_of("박민수", &[])).await;
        assert_eq!(result.score.total, 0);
        assert_eq!(result.score.percentage, 0.0);
    }

    #[tokio::test]
    async fn semantic_fallback_flips_verdict() {
        let (engine, verifier) = engine();
        verifier.set_verdict("1", true);
        // 韩文表述题，字面不匹配 → 进语义批次 → 改判正确
        let result = engine
            .score(
                "s1",
                &key_of(&[(1, "좋은 선생님")]),
                &exam_of("허재인", &[(1, "좋은 분")]),
            )
            .await;
        assert_eq!(verifier.call_count(), 1);
        assert!(result.results[0].is_correct);
        assert_eq!(result.score.correct, 1);
    }

    #[tokio::test]
    async fn sentinel_answers_skip_semantic_batch() {
        let (engine, verifier) = engine();
        let result = engine
            .score(
                "s1",
                &key_of(&[(1, "좋은 선생님"), (2, "서울")]),
                &exam_of("허재인", &[(1, "(unwritten)"), (2, "(unreadable)")]),
            )
            .await;
        assert_eq!(verifier.call_count(), 0);
        assert_eq!(result.score.correct, 0);
    }

    #[tokio::test]
    async fn non_script_answers_skip_semantic_batch() {
        let (engine, verifier) = engine();
        // 固定选项题答错：不值得语义判定
        let result = engine
            .score("s1", &key_of(&[(1, "A/B")]), &exam_of("김철수", &[(1, "c")]))
            .await;
        assert_eq!(verifier.call_count(), 0);
        assert!(!result.results[0].is_correct);
    }

    #[tokio::test]
    async fn verifier_failure_keeps_provisional_results() {
        struct FailingVerifier;
        #[async_trait::async_trait]
        impl crate::clients::SemanticVerifier for FailingVerifier {
            async fn verify_batch(
                &self,
                _candidates: &[VerifyCandidate],
            ) -> crate::error::AppResult<Vec<crate::clients::VerifyVerdict>> {
                Err(AppError::Other("网络中断".to_string()))
            }
        }

        let engine = GradingEngine::new(Arc::new(FailingVerifier), vec![ScriptKind::Hangul]);
        let result = engine
            .score(
                "s1",
                &key_of(&[(1, "좋은 선생님")]),
                &exam_of("허재인", &[(1, "좋은 분")]),
            )
            .await;
        // 兜底失败被吞掉，临时判错保持
        assert!(!result.results[0].is_correct);
        assert_eq!(result.score.correct, 0);
    }

    #[tokio::test]
    async fn positions_are_clamped_and_page_defaults() {
        let (engine, _) = engine();
        let mut key = key_of(&[(1, "a")]);
        key.answers.get_mut(&1).unwrap().x = 1.5;
        key.answers.get_mut(&1).unwrap().y = -0.2;
        let result = engine.score("s1", &key, &exam_of("x", &[(1, "a")])).await;
        let pos = result.results[0].position.unwrap();
        assert_eq!(pos.x, 1.0);
        assert_eq!(pos.y, 0.0);
        assert_eq!(pos.page, 1);
    }

    #[tokio::test]
    async fn edit_rematches_and_marks_edited() {
        let (engine, _) = engine();
        let graded = engine
            .score("s1", &key_of(&[(1, "a"), (2, "b")]), &exam_of("x", &[(1, "a"), (2, "b")]))
            .await;
        assert_eq!(graded.score.correct, 2);

        // 把原本正确的第 1 题改成错误答案
        let edited = engine.recalculate_after_edit("s1", &graded.results, 1, "z");
        let q1 = &edited.results[0];
        assert!(!q1.is_correct);
        assert!(q1.is_edited);
        assert_eq!(q1.student_answer, "z");
        assert_eq!(edited.score.correct, 1);
    }

    #[tokio::test]
    async fn toggle_overrides_without_matcher() {
        let (engine, _) = engine();
        let graded = engine
            .score(
                "s1",
                &key_of(&[(1, "좋은 선생님")]),
                &exam_of("x", &[(1, "전혀 다른 답")]),
            )
            .await;
        assert!(!graded.results[0].is_correct);

        // 教师认定语义兜底判错了，手动改对
        let toggled = engine.toggle_correct_status("s1", &graded.results, 1, true);
        assert!(toggled.results[0].is_correct);
        assert!(toggled.results[0].is_edited);
        assert_eq!(toggled.score.correct, 1);
        // 学生答案本身不被改动
        assert_eq!(toggled.results[0].student_answer, "전혀 다른 답");
    }
}
