mod engine_flow;
mod mock_market;
