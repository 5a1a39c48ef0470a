//! The Commotion HR screening interview: greet and collect the candidate's
//! name, ask for the expected salary, then either continue to the motivation
//! question or close out, depending on the salary cap.
//!
//! Each handler writes what it collected into the session's flow state and
//! returns the next node by value, so the branch taken is a function of the
//! answer, not of a static graph.

use crate::flow::state::{FlowState, FlowStateStore, StateValue};
use crate::flow::{
    FlowArgs, FunctionHandler, FunctionSchema, HandlerOutcome, NodeConfig, ParameterSchema,
    ParameterSpec, PostAction,
};
use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Salary expectations above this (in LPA) end the interview early.
pub const SALARY_CAP_LPA: f64 = 50.0;

#[derive(Debug, Clone, Copy)]
struct CollectName;

#[async_trait]
impl FunctionHandler for CollectName {
    async fn call(&self, args: FlowArgs, state: &FlowState) -> anyhow::Result<HandlerOutcome> {
        let name = args
            .get("name")
            .and_then(Value::as_str)
            .context("name argument missing")?
            .trim()
            .to_string();

        state.set("name".to_string(), StateValue::String(name.clone()));
        info!("collected candidate name: {name}");

        Ok(HandlerOutcome::transition(
            json!({"name": name, "status": "success"}),
            salary_node(),
        ))
    }
}

#[derive(Debug, Clone, Copy)]
struct CollectSalary;

#[async_trait]
impl FunctionHandler for CollectSalary {
    async fn call(&self, args: FlowArgs, state: &FlowState) -> anyhow::Result<HandlerOutcome> {
        let salary = args
            .get("salary")
            .and_then(Value::as_f64)
            .context("salary argument missing")?;

        state.set("salary_expectation".to_string(), StateValue::Number(salary));

        let too_high = salary > SALARY_CAP_LPA;
        let result = json!({"salary": salary, "status": "success", "too_high": too_high});

        if too_high {
            info!("salary too high: {salary} LPA, closing out");
            Ok(HandlerOutcome::transition(result, rejection_node()))
        } else {
            info!("salary acceptable: {salary} LPA, continuing to motivation");
            Ok(HandlerOutcome::transition(result, motivation_node()))
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CollectMotivation;

#[async_trait]
impl FunctionHandler for CollectMotivation {
    async fn call(&self, args: FlowArgs, state: &FlowState) -> anyhow::Result<HandlerOutcome> {
        let motivation = args
            .get("motivation")
            .and_then(Value::as_str)
            .context("motivation argument missing")?
            .trim()
            .to_string();

        state.set("motivation".to_string(), StateValue::String(motivation.clone()));
        info!("collected motivation: {}...", truncate(&motivation, 50));

        Ok(HandlerOutcome::transition(
            json!({"motivation": motivation, "status": "success"}),
            resolution_node(),
        ))
    }
}

#[derive(Debug, Clone, Copy)]
struct EndInterview;

#[async_trait]
impl FunctionHandler for EndInterview {
    async fn call(&self, _args: FlowArgs, _state: &FlowState) -> anyhow::Result<HandlerOutcome> {
        info!("interview completed");
        // No transition; the node's post-action ends the conversation.
        Ok(HandlerOutcome::stay(json!({"status": "success"})))
    }
}

fn truncate(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn end_interview_function() -> FunctionSchema {
    FunctionSchema::new(
        "end_interview",
        "Complete the interview process.",
        ParameterSchema::new(),
        Arc::new(EndInterview),
    )
}

/// Greeting node; the only one carrying role messages.
pub fn initial_node() -> NodeConfig {
    let collect_name = FunctionSchema::new(
        "collect_name",
        "Save the candidate's full name to state and move to salary discussion.",
        ParameterSchema::new()
            .property(
                "name",
                ParameterSpec::string().with_description("The candidate's full name"),
            )
            .required("name"),
        Arc::new(CollectName),
    );

    NodeConfig::new("initial")
        .with_role_message(
            "You're an HR interviewer at Commotion, a tech company. Speak naturally like you're \
             having a real conversation—warm but professional. Keep your responses short (1-2 \
             sentences max). Never use emojis, special characters, or markdown since this is \
             voice. Always call the available function once you have the information needed.",
        )
        .with_task_message(
            "[System] : Start with a friendly greeting. Say you're from Commotion's HR team and \
             you'll be conducting a quick interview today. Ask for their full name. Once they \
             tell you their name, immediately call collect_name with it.",
        )
        .with_function(collect_name)
}

pub fn salary_node() -> NodeConfig {
    let collect_salary = FunctionSchema::new(
        "collect_salary",
        "Save salary expectation in LPA. If over 50 LPA, route to rejection; otherwise continue \
         to motivation question.",
        ParameterSchema::new()
            .property(
                "salary",
                ParameterSpec::number()
                    .with_description("Salary expectation in LPA (Lakhs Per Annum)")
                    .with_minimum(1.0)
                    .with_maximum(200.0),
            )
            .required("salary"),
        Arc::new(CollectSalary),
    );

    NodeConfig::new("salary_collection")
        .with_task_message(
            "[System] : Thank them briefly for sharing their name. Then ask what salary they're \
             expecting in LPA. Make it clear you need a number in Lakhs Per Annum. Once they \
             give you a number, call collect_salary immediately.",
        )
        .with_function(collect_salary)
}

pub fn motivation_node() -> NodeConfig {
    let collect_motivation = FunctionSchema::new(
        "collect_motivation",
        "Save the candidate's motivation for joining Commotion and proceed to positive \
         resolution.",
        ParameterSchema::new()
            .property(
                "motivation",
                ParameterSpec::string()
                    .with_description("The candidate's motivation for joining Commotion"),
            )
            .required("motivation"),
        Arc::new(CollectMotivation),
    );

    NodeConfig::new("motivation_collection")
        .with_task_message(
            "[System] : Acknowledge their salary expectation briefly. Then ask why they \
             specifically want to join Commotion—what draws them to the company? Listen to \
             their full answer, then call collect_motivation with what they said.",
        )
        .with_function(collect_motivation)
}

/// Terminal node for successful candidates.
pub fn resolution_node() -> NodeConfig {
    NodeConfig::new("resolution")
        .with_task_message(
            "[System] : Thank them for taking the time to interview. Say something positive \
             about their motivation or background. Let them know the HR team will review their \
             profile and reach out within 2-3 business days with next steps. Then call \
             end_interview.",
        )
        .with_function(end_interview_function())
        .with_post_action(PostAction::EndConversation)
}

/// Terminal node when the salary expectation is over the cap.
pub fn rejection_node() -> NodeConfig {
    NodeConfig::new("rejection")
        .with_task_message(
            "[System] : Thank them for their interest in Commotion. Gently explain that their \
             salary expectation is higher than what the role currently offers. Keep it \
             respectful—mention you appreciate their time and wish them success in finding the \
             right opportunity. Then call end_interview.",
        )
        .with_function(end_interview_function())
        .with_post_action(PostAction::EndConversation)
}
