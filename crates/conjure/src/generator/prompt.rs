// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.


use super::GenerationRequest;

const ARGUMENT_PREVIEW_LIMIT: usize = 1000;

const SYSTEM_PROMPT: &str = r#"You write the body of an async JavaScript function that implements a named call.

Bindings available to the body:
1. args: array of the call's arguments.
2. z: shape builders used to declare expected results:
   z.string() z.number() z.integer() z.boolean() z.null() z.any()
   z.array(s) z.object({ key: s }) z.enum(["a", "b"]) z.literal(v) z.union([s1, s2])
   every shape also has .optional() and .nullable().
3. v: handle for delegating to other named calls.
   await v.someName(arg1, arg2)          -> untyped result
   await v["any text prompt"]()(z.string()) -> result checked against the shape
   Always append a shape when delegating.

Pick one approach:

A. Plain logic. Arithmetic, string and array work, randomness, formatting.
   return args[0] + args[1];

B. Direct answer. When the name itself is the request and the arguments are empty
   or only configuration, return the content directly.

C. Delegation. When the task needs model knowledge applied to the arguments
   ("explain X", "translate Y"), build a prompt from args and delegate through v
   with a shape describing the expected result. Do not hardcode the answer.
   const prompt = `Summarise ${args[0]} in ${args[1]} words`;
   return await v[prompt]()(z.string());

Rules:
- Never hardcode values that should come from args; the body is reused for other inputs.
- Return a JSON-serialisable value.
- Reply with the function body only: no declaration, no markdown, no explanation."#;

/// Builds the system and user prompts sent to a model for one call.
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn system_prompt(&self) -> String {
        SYSTEM_PROMPT.to_string()
    }

    pub fn user_prompt(&self, request: &GenerationRequest) -> String {
        let expected = request
            .output_shape
            .as_ref()
            .map(|s| s.describe())
            .unwrap_or_else(|| "any".to_string());

        if request.is_terminal_hop {
            return format!(
                "Delegation limit reached.\n\
                 Answer \"{name}\" directly.\n\
                 Return a value of type: {expected}\n\
                 Do not use v.",
                name = request.name,
            );
        }

        let arguments = if request.arguments.is_empty() {
            "Arguments: none".to_string()
        } else {
            let rendered = serde_json::to_string(&request.arguments).unwrap_or_default();
            format!(
                "Current argument values (context only, do not hardcode): {}",
                truncate_chars(&rendered, ARGUMENT_PREVIEW_LIMIT)
            )
        };
        let kinds: Vec<&str> = request
            .arguments
            .iter()
            .map(crate::fingerprint::value_kind)
            .collect();

        format!(
            "Implement \"{name}\".\n\
             Argument kinds: [{kinds}]\n\
             {arguments}\n\
             Expected return type: {expected}\n\n\
             Checklist:\n\
             1. Does \"{name}\" need model knowledge about the arguments? Use C and delegate with a shape.\n\
             2. Is \"{name}\" a complete request on its own with no arguments? Use B.\n\
             3. Otherwise use A.",
            name = request.name,
            kinds = kinds.join(", "),
        )
    }
}

fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
