mod failures;
mod loading;
mod utils;
