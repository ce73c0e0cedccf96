//! Line-oriented survey front-end on stdin/stdout.

use std::io::{self, BufRead, Write};

use services::{
    FlushReport, NetworkSwitch, ReconcileError, SessionOrigin, SurveySession,
    SurveySessionService,
};
use survey_core::model::{LikertValue, Question, QuestionId, SessionPhase};

type AppResult = Result<(), Box<dyn std::error::Error>>;

enum Input {
    Likert(LikertValue),
    DontUnderstand,
    Back,
    Quit,
    Invalid,
}

fn parse_input(line: &str) -> Input {
    match line.trim() {
        "?" => Input::DontUnderstand,
        "b" | "back" => Input::Back,
        "q" | "quit" => Input::Quit,
        other => other
            .parse::<i64>()
            .ok()
            .and_then(|n| LikertValue::try_from(n).ok())
            .map_or(Input::Invalid, Input::Likert),
    }
}

fn prompt(label: &str) -> io::Result<Option<String>> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_owned()))
}

/// The don't-understand flag lives in the persisted answer, so it survives a
/// reload between flagging and picking a value.
fn is_flagged(session: &SurveySession, question_id: &QuestionId) -> bool {
    session
        .state()
        .answer(question_id)
        .is_some_and(|answer| answer.dont_understand)
}

fn show_question(session: &SurveySession, question: &Question) {
    let progress = session.progress();
    let section = if progress.phase == SessionPhase::AnsweringOptional {
        "optional"
    } else {
        "required"
    };
    println!();
    println!("[{}/{} {section}] {}", progress.cursor + 1, progress.total, question.text);
    if let Some(continuum) = session.survey().continua().get(&question.continuum) {
        let left = continuum.left_label.as_deref().unwrap_or("");
        let right = continuum.right_label.as_deref().unwrap_or("");
        if !left.is_empty() || !right.is_empty() {
            println!("  {}: {left} <-> {right}", continuum.name);
        }
    }
    if let Some(answer) = session.state().answer(&question.id) {
        let current = answer.likert.map_or("none", LikertValue::label);
        let flag = if answer.dont_understand { " (flagged)" } else { "" };
        println!("  current answer: {current}{flag}");
    }
    let scale: Vec<String> = LikertValue::ALL
        .iter()
        .map(|v| format!("{}={}", v.value(), v.label()))
        .collect();
    println!("  {}", scale.join(", "));
}

/// Run the session until it is submitted or the participant quits.
pub async fn take(
    service: &SurveySessionService,
    network: &NetworkSwitch,
    mut session: SurveySession,
) -> AppResult {
    match session.origin() {
        SessionOrigin::Fresh => println!("{}", session.survey().title()),
        SessionOrigin::Resumed => println!("Resuming {}.", session.survey().title()),
        SessionOrigin::ReplacedStale => {
            println!("The survey changed since your last visit; starting over.");
        }
    }

    loop {
        match session.state().phase() {
            SessionPhase::Completed => return submit(service, network, &mut session).await,
            SessionPhase::TransitionPending => {
                println!();
                println!("All required questions are answered.");
                let Some(choice) = prompt("[m]ore questions or [r]esults? ")? else {
                    return Ok(());
                };
                match choice.as_str() {
                    "m" | "more" => {
                        service.answer_more(&mut session)?;
                    }
                    "r" | "results" => {
                        let outcome = service.go_to_results(&mut session).await?;
                        return report(service, network, &mut session, outcome.final_flush).await;
                    }
                    "q" | "quit" => return Ok(()),
                    _ => println!("Please type m or r."),
                }
            }
            SessionPhase::AnsweringRequired | SessionPhase::AnsweringOptional => {
                let Some(question) = session.current_question().cloned() else {
                    return Ok(());
                };
                show_question(&session, &question);
                let Some(line) = prompt("> ")? else {
                    return Ok(());
                };
                match parse_input(&line) {
                    Input::Likert(likert) => {
                        let flagged = is_flagged(&session, &question.id);
                        let outcome = service
                            .answer_current(&mut session, likert, flagged)
                            .await?;
                        if outcome.final_flush.is_some() {
                            return report(service, network, &mut session, outcome.final_flush)
                                .await;
                        }
                    }
                    Input::DontUnderstand => {
                        let likert = session.state().answer(&question.id).and_then(|a| a.likert);
                        service.record(&mut session, &question.id, likert, true)?;
                        println!("  Flagged. Pick the closest value to continue.");
                    }
                    Input::Back => match service.retreat(&mut session) {
                        Ok(true) => {}
                        Ok(false) => println!("  Already at the first question."),
                        Err(_) => println!("  You cannot go back from here."),
                    },
                    Input::Quit => {
                        println!("Progress saved.");
                        return Ok(());
                    }
                    Input::Invalid => println!("  Type -2, -1, 1 or 2 (or ?, b, q)."),
                }
            }
        }
    }
}

async fn submit(
    service: &SurveySessionService,
    network: &NetworkSwitch,
    session: &mut SurveySession,
) -> AppResult {
    let result = service.finalize(session).await;
    report(service, network, session, Some(result)).await
}

/// Print a flush outcome, offering retries while they make sense.
async fn report(
    service: &SurveySessionService,
    network: &NetworkSwitch,
    session: &mut SurveySession,
    mut result: Option<Result<FlushReport, ReconcileError>>,
) -> AppResult {
    loop {
        match result.take() {
            None => return Ok(()),
            Some(Ok(flush)) => {
                println!();
                println!(
                    "Submitted. {} new response(s), {} already on record.",
                    flush.submitted, flush.already_present
                );
                return Ok(());
            }
            Some(Err(err)) if err.is_retryable() => {
                println!();
                println!("Could not submit: {err}");
                let Some(choice) = prompt("[r]etry or [q]uit (answers are kept)? ")? else {
                    return Ok(());
                };
                if choice != "r" && choice != "retry" {
                    return Ok(());
                }
                if matches!(err, ReconcileError::Offline) {
                    network.set_online(true);
                }
                result = Some(service.finalize(session).await);
            }
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

/// Summarize a persisted session.
pub fn print_status(session: &SurveySession) {
    let progress = session.progress();
    println!("Survey:    {}", session.survey().title());
    println!("Phase:     {}", progress.phase);
    println!(
        "Answered:  {} of {} ({} required)",
        progress.answered, progress.total, progress.required_total
    );
    println!("Position:  {}", progress.cursor);
    match session.state().remote_participant_id() {
        Some(id) => println!("Participant: {id}"),
        None => println!("Participant: not yet created"),
    }
}
