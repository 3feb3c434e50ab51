//! Built-in question bank
//!
//! The bank is loaded once at startup and shared read-only; every game
//! takes its own snapshot at creation, so a session in flight is never
//! affected by bank changes.

use shared::Question;

const DEFAULT_TIME_LIMIT_SECONDS: f32 = 20.0;

fn question(id: u32, prompt: &str, options: [&str; 4], correct_option_index: u8) -> Question {
    Question {
        id,
        prompt: prompt.to_string(),
        options: options.map(str::to_string),
        correct_option_index,
        time_limit_seconds: DEFAULT_TIME_LIMIT_SECONDS,
    }
}

/// The question set served when no other bank is supplied.
pub fn default_question_bank() -> Vec<Question> {
    vec![
        question(
            1,
            "Which planet in the solar system has the most moons?",
            ["Jupiter", "Saturn", "Uranus", "Neptune"],
            1,
        ),
        question(
            2,
            "What is the chemical symbol for gold?",
            ["Go", "Gd", "Au", "Ag"],
            2,
        ),
        question(
            3,
            "In which year did the first human land on the Moon?",
            ["1965", "1967", "1969", "1971"],
            2,
        ),
        question(
            4,
            "Which ocean is the deepest?",
            ["Atlantic", "Indian", "Arctic", "Pacific"],
            3,
        ),
        question(
            5,
            "Who wrote the novel 'One Hundred Years of Solitude'?",
            [
                "Jorge Luis Borges",
                "Gabriel Garcia Marquez",
                "Mario Vargas Llosa",
                "Pablo Neruda",
            ],
            1,
        ),
        question(
            6,
            "What is the largest internal organ of the human body?",
            ["Heart", "Brain", "Liver", "Lungs"],
            2,
        ),
        question(
            7,
            "Which country hosted the first modern Olympic Games in 1896?",
            ["France", "Greece", "England", "Italy"],
            1,
        ),
        question(
            8,
            "What does the 'HTTP' in a web address stand for?",
            [
                "HyperText Transfer Protocol",
                "High Throughput Transfer Process",
                "Hyperlink Text Transport Protocol",
                "Host Transfer Text Protocol",
            ],
            0,
        ),
        question(
            9,
            "Which element has the atomic number 1?",
            ["Helium", "Oxygen", "Hydrogen", "Carbon"],
            2,
        ),
        question(
            10,
            "The Great Barrier Reef lies off the coast of which country?",
            ["Brazil", "Australia", "Indonesia", "Mexico"],
            1,
        ),
    ]
}
