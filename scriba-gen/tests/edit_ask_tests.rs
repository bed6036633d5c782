//! Editor and tutor integration tests
//!
//! Edits are all-or-nothing per region; questions never change the session.

mod helpers;

use helpers::{lecture, part_number, session, ScriptedModel};
use scriba_common::config::Operation;
use scriba_gen::model::ModelError;
use scriba_gen::pipeline::types::UnitState;
use scriba_gen::{EditTarget, PipelineError};

#[tokio::test]
async fn test_edit_replaces_only_target_region() {
    let model = ScriptedModel::well_behaved();
    let session = session(model.clone());
    let before = session.build(lecture(6), None).await.unwrap();

    let after = session
        .edit(EditTarget::Unit(1), "rewrite more clearly")
        .await
        .unwrap();

    assert_eq!(after.len(), before.len());
    assert_eq!(after.segment(0), before.segment(0));
    assert_eq!(after.segment(1), Some("\\section{Edited}\nBetter body."));
    assert_eq!(after.segment(2), before.segment(2));

    let cache = session.cache().await;
    assert_eq!(cache.segments()[1].text, "\\section{Edited}\nBetter body.");
    assert_eq!(cache.edit_log().len(), 1);
    assert_eq!(cache.edit_log()[0].unit_index, 1);
}

#[tokio::test]
async fn test_edit_request_is_bounded_to_region_evidence() {
    let model = ScriptedModel::well_behaved();
    let session = session(model.clone());
    session.build(lecture(6), None).await.unwrap();

    session
        .edit(EditTarget::Unit(2), "add an example")
        .await
        .unwrap();

    let edit_request = model
        .requests()
        .into_iter()
        .find(|r| r.operation == Operation::Editor)
        .unwrap();
    let text = edit_request.text();
    assert!(text.contains("sentence number 4"));
    assert!(text.contains("sentence number 5"));
    assert!(!text.contains("sentence number 0"));
    assert!(text.contains("\\section{Part 3}"));
    assert!(text.contains("add an example"));
}

#[tokio::test]
async fn test_span_edit_splices_into_region() {
    let model = ScriptedModel::new(|request| match request.operation {
        Operation::Editor => Ok("Improved.".to_string()),
        _ => Ok(format!("\\section{{Part {}}}\nBody.", part_number(request))),
    });
    let session = session(model);
    session.build(lecture(2), None).await.unwrap();

    // "\section{Part 1}\n" is 17 bytes; replace "Body."
    let after = session
        .edit(
            EditTarget::Span {
                unit_index: 0,
                range: 17..22,
            },
            "polish",
        )
        .await
        .unwrap();

    assert_eq!(after.segment(0), Some("\\section{Part 1}\nImproved."));
}

#[tokio::test]
async fn test_invalid_rewrite_leaves_document_identical() {
    let model = ScriptedModel::new(|request| match request.operation {
        Operation::Editor => Ok("\\begin{theorem} unbalanced {".to_string()),
        _ => Ok(format!("\\section{{Part {}}}", part_number(request))),
    });
    let session = session(model);
    let before = session.build(lecture(6), None).await.unwrap();

    let err = session
        .edit(EditTarget::Unit(0), "break it")
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::EditValidation { unit_index: 0, .. }));
    let after = session.document().await;
    assert_eq!(after.render().as_bytes(), before.render().as_bytes());
    assert!(session.cache().await.edit_log().is_empty());
}

#[tokio::test]
async fn test_edit_with_unavailable_model_leaves_document_identical() {
    let model = ScriptedModel::new(|request| match request.operation {
        Operation::Editor => Err(ModelError::Unavailable("503".into())),
        _ => Ok(format!("\\section{{Part {}}}", part_number(request))),
    });
    let session = session(model.clone());
    let before = session.build(lecture(2), None).await.unwrap();

    let err = session.edit(EditTarget::Unit(0), "x").await.unwrap_err();

    assert!(matches!(err, PipelineError::RetryExhausted { .. }));
    assert_eq!(session.document().await, before);
    assert_eq!(model.count(Operation::Editor), 3);
}

#[tokio::test]
async fn test_editing_placeholder_marks_unit_validated() {
    // Part 2 of 3 never validates and becomes a placeholder
    let model = ScriptedModel::new(|request| match request.operation {
        Operation::Editor => Ok("\\section{Recovered}".to_string()),
        _ => match part_number(request) {
            2 => Ok("\\begin{proof} never closed".to_string()),
            n => Ok(format!("\\section{{Part {}}}", n)),
        },
    });
    let session = session(model);
    session.build(lecture(6), None).await.unwrap();
    assert_eq!(session.cache().await.failed_units(), vec![1]);

    let after = session
        .edit(EditTarget::Unit(1), "write the missing part")
        .await
        .unwrap();

    assert_eq!(after.segment(1), Some("\\section{Recovered}"));
    let cache = session.cache().await;
    assert!(cache.segments()[1].validated);
    assert_eq!(cache.state(1), Some(&UnitState::Validated));
    assert!(cache.failed_units().is_empty());
}

#[tokio::test]
async fn test_unknown_edit_target() {
    let model = ScriptedModel::well_behaved();
    let session = session(model.clone());
    session.build(lecture(2), None).await.unwrap();

    let err = session.edit(EditTarget::Unit(7), "x").await.unwrap_err();
    assert!(matches!(err, PipelineError::EditTargetNotFound(_)));

    let err = session
        .edit(EditTarget::Excerpt("not in the notes".into()), "x")
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::EditTargetNotFound(_)));
    assert_eq!(model.count(Operation::Editor), 0);
}

#[tokio::test]
async fn test_edit_and_ask_before_build() {
    let session = session(ScriptedModel::well_behaved());

    assert!(matches!(
        session.edit(EditTarget::Unit(0), "x").await,
        Err(PipelineError::NotBuilt)
    ));
    assert!(matches!(session.ask("why?").await, Err(PipelineError::NotBuilt)));
}

#[tokio::test]
async fn test_ask_is_read_only() {
    let model = ScriptedModel::well_behaved();
    let session = session(model.clone());
    session.build(lecture(6), None).await.unwrap();
    session.edit(EditTarget::Unit(1), "tidy").await.unwrap();

    let snapshot = {
        let cache = session.cache().await;
        (
            cache.document().clone(),
            cache.segments().to_vec(),
            cache.edit_log().len(),
            cache.units().to_vec(),
        )
    };

    for question in ["Why does the theorem hold?", "What is sentence number 3?", "again"] {
        let answer = session.ask(question).await.unwrap();
        assert_eq!(answer, "Because of the theorem.");
    }

    let cache = session.cache().await;
    assert_eq!(cache.document(), &snapshot.0);
    assert_eq!(cache.segments(), snapshot.1.as_slice());
    assert_eq!(cache.edit_log().len(), snapshot.2);
    assert_eq!(cache.units(), snapshot.3.as_slice());
    assert_eq!(model.count(Operation::Tutor), 3);
}

#[tokio::test]
async fn test_tutor_request_carries_question_and_notes() {
    let model = ScriptedModel::well_behaved();
    let session = session(model.clone());
    session.build(lecture(2), None).await.unwrap();

    session.ask("What was said first?").await.unwrap();

    let request = model
        .requests()
        .into_iter()
        .find(|r| r.operation == Operation::Tutor)
        .unwrap();
    let text = request.text();
    assert!(text.contains("STUDENT QUESTION:\nWhat was said first?"));
    assert!(text.contains("sentence number 0"));
    assert!(text.contains("\\section{Part 1}"));
    assert_eq!(request.image_count(), 0);
}
