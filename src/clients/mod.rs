pub mod fleet_api_client;
