mod generators;

mod messages;
mod token_parsing;
