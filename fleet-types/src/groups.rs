use crate::model::{AgentKey, UserId};

pub fn client_group_name(user_id: UserId) -> String {
    format!("user_{user_id}_clients")
}

pub fn agent_group_name(key: &AgentKey) -> String {
    format!("agent_{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_group_name_is_stable() {
        assert_eq!(client_group_name(7), "user_7_clients");
    }

    #[test]
    fn agent_group_name_is_stable() {
        let key: AgentKey = "3fa85f64-5717-4562-b3fc-2c963f66afa6".parse().unwrap();
        assert_eq!(
            agent_group_name(&key),
            "agent_3fa85f64-5717-4562-b3fc-2c963f66afa6"
        );
    }
}
