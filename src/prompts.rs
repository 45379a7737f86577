//! Prompt text sent to the generative backend.
//!
//! Each builder returns the full instruction block for one request kind.
//! JSON-producing prompts end with an example of the exact shape the
//! payload normalizer accepts.

pub fn syllabus(topic: &str) -> String {
    format!(
        r#"You are an expert curriculum designer using the Pareto Principle (80/20 rule) and first-principles thinking.

Goal: create a hierarchical learning syllabus for "{topic}" that puts the 20% of concepts giving 80% of the understanding first.

1. Deconstruct the topic into its fundamental, atomic concepts.
2. Order modules from foundational to advanced, highest leverage first.
3. Return a JSON tree.

Output strictly valid JSON:
{{
  "title": "{topic}",
  "description": "A high-leverage guide to {topic} built on first principles.",
  "subtopics": [
    {{
      "title": "Module title",
      "description": "Why this is a core piece of the puzzle.",
      "subtopics": [{{ "title": "Subtopic title", "description": "...", "subtopics": [] }}]
    }}
  ]
}}"#
    )
}

pub fn elaboration(title: &str, description: &str, instruction: &str) -> String {
    format!(
        r#"You are an expert tutor applying the Feynman Technique to explain "{title}".

Current context: {description}
User instruction: {instruction}

1. Explanation: a Markdown description written for a smart 12-year-old, with analogies and plain language.
2. Concepts: 3-5 core chunks, each with a title, a description and 3 activities (recall, understanding, application).
3. Subtopics: 3-5 logical next steps.
4. Resources: 3-5 high-quality external references.

Output strictly valid JSON:
{{
  "description": "Markdown explanation...",
  "concepts": [
    {{
      "title": "Concept title",
      "description": "...",
      "activities": [
        {{ "type": "quiz", "instructions": "...", "content": {{ "question": "...", "options": [], "correct": "..." }} }},
        {{ "type": "read", "instructions": "...", "content": "..." }}
      ]
    }}
  ],
  "subtopics": [{{ "title": "Subtopic title", "description": "...", "subtopics": [] }}],
  "resources": [{{ "title": "Resource title", "url": "https://..." }}]
}}"#
    )
}

pub fn concepts(title: &str, description: &str) -> String {
    format!(
        r#"You are an instructional designer using Chunking.

Goal: break "{title}" into a linear sequence of atomic concepts, each learnable in 5-10 minutes.
Context: {description}

Each concept must be distinct and self-contained, ordered for a smooth learning curve.

Output strictly valid JSON:
[
  {{ "title": "Concept title", "description": "Brief, simple explanation.", "order_index": 1 }}
]"#
    )
}

pub fn activities(concept_title: &str, context: &str) -> String {
    format!(
        r#"You are an instructional designer using Bloom's Taxonomy.

Goal: create 3 learning activities for "{concept_title}".
Context: {context}

Create one activity per level: recall (quiz or flashcard), understanding (explain in your own words), application (a practical problem).
Supported types: "read", "watch", "quiz", "drill", "flashcard", "project".

Output strictly valid JSON:
[
  {{ "type": "quiz", "instructions": "Test your recall...", "content": {{ "question": "...", "options": ["A", "B", "C"], "correct": "A" }} }},
  {{ "type": "read", "instructions": "Deepen your understanding...", "content": "Markdown text..." }}
]"#
    )
}

pub fn summary(text: &str) -> String {
    format!(
        r#"Summarize the following text using the Feynman Technique.

Explain the key concepts as if teaching a new student, in simple and clear language. Define any jargon immediately and strip away unnecessary complexity.

Text:
{text}"#
    )
}

pub fn answer(title: &str, context: &str, question: &str) -> String {
    format!(
        r#"You are a Socratic tutor specializing in "{title}".
Context: {context}

User question: {question}

Answer clearly but encourage active thinking. If the user is stuck, guide them with a question instead of handing over the answer. If they ask for a direct explanation, give one using simple analogies."#
    )
}
