mod reclaim;
mod service;
mod strategy;
