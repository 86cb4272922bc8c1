//! Terminal consultation loop.
//!
//! Drives a [`ChatEngine`] from line-oriented input: log in, pick a
//! constitution on the first visit, then one consultation turn per line.
//! Input and output are generic so tests can script a whole session.
//!
//! Commands inside the loop: `/history` reprints past consultations,
//! `/quit` (or end of input) leaves.

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};

use crate::chat::{ChatEngine, Session};
use crate::models::{Constitution, DiagnosisRecord};

async fn say<W: AsyncWrite + Unpin>(out: &mut W, text: &str) -> Result<()> {
    out.write_all(text.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}

async fn ask_line<R, W>(lines: &mut Lines<R>, out: &mut W, prompt: &str) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    out.write_all(prompt.as_bytes()).await?;
    out.flush().await?;
    Ok(lines.next_line().await?.map(|l| l.trim().to_string()))
}

pub fn format_history(history: &[DiagnosisRecord]) -> String {
    if history.is_empty() {
        return "No previous consultations.".to_string();
    }
    let mut text = String::from("Previous consultations:");
    for rec in history {
        text.push_str(&format!(
            "\n  [{}] {} -> {}",
            rec.recorded_at, rec.symptom, rec.summary
        ));
    }
    text
}

fn constitution_menu() -> String {
    let mut text = String::from("To tailor prescriptions, tell me your constitution once:");
    for (i, c) in Constitution::ALL.iter().enumerate() {
        text.push_str(&format!("\n  {}. {} - {}", i + 1, c.label(), c.description()));
    }
    text.push_str("\n  (type 'skip' to continue without one)");
    text
}

/// Ask for a constitution until a valid one (or `skip`) is entered.
/// Returns `None` on skip or end of input.
async fn choose_constitution<R, W>(lines: &mut Lines<R>, out: &mut W) -> Result<Option<Constitution>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    say(out, &constitution_menu()).await?;
    loop {
        let Some(answer) = ask_line(lines, out, "Constitution: ").await? else {
            return Ok(None);
        };
        if answer.eq_ignore_ascii_case("skip") {
            return Ok(None);
        }
        match answer.parse::<Constitution>() {
            Ok(c) => return Ok(Some(c)),
            Err(e) => say(out, &format!("{}. Please choose 1-5.", e)).await?,
        }
    }
}

/// Run an interactive consultation until `/quit` or end of input.
pub async fn run<R, W>(
    engine: &ChatEngine,
    user: Option<String>,
    input: R,
    out: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    let user_id = match user.filter(|u| !u.trim().is_empty()) {
        Some(u) => u,
        None => loop {
            match ask_line(&mut lines, out, "Enter your name or ID: ").await? {
                None => return Ok(()),
                Some(id) if !id.is_empty() => break id,
                Some(_) => {}
            }
        },
    };

    let mut session = engine.start_session(&user_id).await?;

    match session.constitution {
        Some(c) => say(out, &format!("Welcome back, {} ({}).", session.user_id, c)).await?,
        None => {
            say(out, &format!("Nice to meet you, {}. This is your first visit.", session.user_id))
                .await?;
            if let Some(c) = choose_constitution(&mut lines, out).await? {
                engine.set_constitution(&mut session, c).await?;
                say(out, &format!("Saved: {}.", c)).await?;
            }
        }
    }

    if !session.history.is_empty() {
        say(out, &format_history(&session.history)).await?;
    }

    say(out, &heading(&session)).await?;
    if let Some(greeting) = session.messages.first() {
        say(out, &greeting.content).await?;
    }

    loop {
        let Some(line) = ask_line(&mut lines, out, "> ").await? else {
            break;
        };
        match line.as_str() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/history" => {
                let history = engine
                    .records()
                    .history(&session.user_id, engine.config().history_turns.max(10))
                    .await?;
                say(out, &format_history(&history)).await?;
                continue;
            }
            _ => {}
        }

        let outcome = engine.ask(&mut session, &line).await?;
        say(out, &outcome.reply).await?;
        for w in &outcome.warnings {
            say(out, &format!("(note: {} unavailable: {})", w.stage, w.message)).await?;
        }
    }

    say(out, "Take care.").await?;
    Ok(())
}

fn heading(session: &Session) -> String {
    match session.constitution {
        Some(c) => format!("{} ({}), what is bothering you?", session.user_id, c),
        None => format!("{}, what is bothering you?", session.user_id),
    }
}
