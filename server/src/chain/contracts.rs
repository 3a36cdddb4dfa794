//! Solidity bindings for the vault contract and the EIP-3009 payment token.

use alloy::sol;

sol! {
    #[sol(rpc)]
    interface IReliQVault {
        function vaultCount() external view returns (uint256);
        function vaults(uint256 vaultId) external view returns (
            address owner,
            bytes encryptedPayload,
            uint256 lastResponse,
            uint256 timeout,
            uint256 amount,
            bool executed
        );
        function encryptedCondition(uint256 vaultId) external view returns (bytes);
        function isUnlocked(uint256 vaultId) external view returns (bool);
        function DOMAIN_SEPARATOR() external view returns (bytes32);
        function HEARTBEAT_TYPEHASH() external view returns (bytes32);
        function canTrigger(uint256 vaultId) external view returns (bool);

        function createVault(bytes encryptedPayload, bytes encryptedCondition, uint256 timeout)
            external payable returns (uint256);
        function respondViaAgent(uint256 vaultId, uint256 timestamp, uint256 nonce, bytes signature)
            external;
        function unlockVault(uint256 vaultId) external;
        function triggerVault(uint256 vaultId, address beneficiary) external;
        function forceExpireTimeout(uint256 vaultId) external;
    }

    #[sol(rpc)]
    interface IERC3009 {
        function balanceOf(address account) external view returns (uint256);
        function authorizationState(address authorizer, bytes32 nonce) external view returns (bool);
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
    }
}
